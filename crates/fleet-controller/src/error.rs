use thiserror::Error;

#[derive(Debug, Error)]
pub enum ControllerError {
    /// The running-instance snapshot could not be read. Nothing was
    /// sampled or changed this tick.
    #[error("fleet snapshot failed: {0}")]
    Snapshot(String),
}
