pub mod aggregate;
pub mod ensemble;
pub mod events;
pub mod features;
pub mod impact;
pub mod model;
pub mod optimizer;
pub mod persist;
pub mod report;
