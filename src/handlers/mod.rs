//! Domain logic run by workers, one handler per job action.

pub mod host;
pub mod notify;
pub mod port;
