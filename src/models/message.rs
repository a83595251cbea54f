use super::job::JobId;

#[derive(Debug)]
pub enum JobMessage {
    Run(JobId),
    WriteOutput(JobId, String),
    Exited(JobId, i32),
    Shutdown,
}
