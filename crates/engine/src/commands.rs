//! Runtime control commands, delivered over an mpsc channel and drained by
//! the scheduler once per tick.

/// External requests into a running engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineCommand {
    /// Close one row now, regardless of its stop/target state.
    CloseRow(usize),
    /// Stop the engine after the current tick.
    Stop,
}
