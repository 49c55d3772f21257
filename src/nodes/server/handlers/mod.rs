//! Handlers for the nine input channels of the server event loop.

mod cache_keys;
mod gossip;
mod management_response;
mod node_depart;
mod node_join;
mod replication_change;
mod replication_response;
mod request;
mod self_depart;
