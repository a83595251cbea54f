pub mod pty;
pub mod worker;
