//! One file per load-balancing policy (spec section 4.D).

mod adaptive;
mod consistent_hash;
mod least_conn;
mod round_robin;
mod weighted;

pub use adaptive::AdaptiveBalancer;
pub use consistent_hash::ConsistentHashBalancer;
pub use least_conn::LeastConnectionBalancer;
pub use round_robin::RoundRobinBalancer;
pub use weighted::WeightedBalancer;
