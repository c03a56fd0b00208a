pub mod ask;
pub mod seed;
pub mod serve;
pub mod watch;
