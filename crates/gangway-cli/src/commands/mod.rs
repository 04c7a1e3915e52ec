pub mod backup;
pub mod deploy;
pub mod rollback;
pub mod status;

mod wiring;

pub(crate) use wiring::{Wiring, operator_name};
