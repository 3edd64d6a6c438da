//! Connection lifecycle state.

/// State of one server connection.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum ConnectionState {
	/// Started, handshake in progress.
	Starting,
	/// initialize/initialized complete, ready for requests.
	Ready,
	/// Failed or exited.
	Dead,
}
