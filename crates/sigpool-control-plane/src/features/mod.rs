pub mod capacity_table;
pub mod dispatch;
pub mod observability;
pub mod provisioning;
