/// Progress of one logical request across authentication retries.
///
/// `Sent -> AwaitingResponse -> (Completed | Challenged -> Rewritten -> Resent -> AwaitingResponse ...) -> Terminal`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExchangeState {
    /// Created, nothing written yet.
    #[default]
    Idle,

    /// The request has been written to a connection.
    Sent,

    /// Waiting for the response head (TTFB).
    AwaitingResponse,

    /// A 401/407 arrived and is being inspected.
    Challenged,

    /// The interceptor produced a rewritten request.
    Rewritten,

    /// The rewritten request has been written.
    Resent,

    /// A final response is available to the caller.
    Completed,

    /// The exchange failed or was aborted.
    Terminal,
}

impl ExchangeState {
    /// Whether `next` is a legal successor of `self`.
    pub fn can_transition_to(self, next: ExchangeState) -> bool {
        use ExchangeState::*;
        match (self, next) {
            (_, Terminal) => self != Terminal,
            (Idle, Sent) => true,
            (Sent | Resent, AwaitingResponse) => true,
            (AwaitingResponse, Completed | Challenged) => true,
            (Challenged, Rewritten | Completed) => true,
            (Rewritten, Resent) => true,
            _ => false,
        }
    }

    pub fn is_finished(self) -> bool {
        matches!(self, ExchangeState::Completed | ExchangeState::Terminal)
    }
}

/// Pooling intent for the connection the exchange will use next.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ChannelState {
    /// No connection yet, or the next send must pick one again.
    #[default]
    New,
    /// The connection came out of the idle set.
    Pooled,
    /// The previous connection was closed and a new one opened.
    Reconnected,
}
