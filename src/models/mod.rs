mod cluster;
mod contact;
mod observation;

pub use cluster::{ClusterView, OrderedSet};
pub use contact::{Contact, LinkPrecedence};
pub use observation::Observation;
