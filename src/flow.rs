//! Flow returns: the per-transfer status of push and pull calls.

use std::collections::HashMap;

use thiserror::Error;

/// Successful transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FlowSuccess {
    /// The buffer was accepted.
    Ok,
}

/// Reasons a transfer stopped.
///
/// Anything other than `Ok` means "stop sending on this link". `Eos` is
/// forwarded downstream, `Error` surfaces on the bus, `Flushing` is
/// swallowed by whoever started the flush.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FlowError {
    /// Push on a pad without a peer.
    #[error("not linked")]
    NotLinked,
    /// No format has been agreed on the link, or the buffer was produced
    /// under caps that have since been invalidated.
    #[error("not negotiated")]
    NotNegotiated,
    /// Clean end of stream.
    #[error("end of stream")]
    Eos,
    /// The pad is not active (element below PAUSED).
    #[error("wrong state")]
    WrongState,
    /// Fatal error; the element posts details on the bus.
    #[error("error")]
    Error,
    /// Aborted by a concurrent flush or seek.
    #[error("flushing")]
    Flushing,
    /// The operation (e.g. pull from a push-only pad) is unsupported.
    #[error("not supported")]
    NotSupported,
}

impl FlowError {
    /// Errors that must be reported on the bus instead of handled locally.
    pub fn is_fatal(self) -> bool {
        matches!(
            self,
            FlowError::Error | FlowError::NotNegotiated | FlowError::NotSupported
        )
    }
}

/// Result of a push or pull.
pub type FlowResult = Result<FlowSuccess, FlowError>;

/// Combines the flow results of several source pads into one upstream result.
///
/// Used by elements that fan out (tee, demuxers): one unlinked branch must
/// not stop the others, but the stream ends once every branch is done.
#[derive(Debug, Default)]
pub struct FlowCombiner {
    last: HashMap<String, FlowResult>,
}

impl FlowCombiner {
    /// Create an empty combiner.
    pub fn new() -> Self {
        Self::default()
    }

    /// Start tracking a pad.
    pub fn add_pad(&mut self, pad: &str) {
        self.last.insert(pad.to_owned(), Ok(FlowSuccess::Ok));
    }

    /// Stop tracking a pad.
    pub fn remove_pad(&mut self, pad: &str) {
        self.last.remove(pad);
    }

    /// Number of tracked pads.
    pub fn len(&self) -> usize {
        self.last.len()
    }

    /// Whether no pad is tracked.
    pub fn is_empty(&self) -> bool {
        self.last.is_empty()
    }

    /// Forget previous results (after a flush).
    pub fn reset(&mut self) {
        for result in self.last.values_mut() {
            *result = Ok(FlowSuccess::Ok);
        }
    }

    /// Record the latest result of `pad` and compute the combined result.
    ///
    /// Fatal results and `Flushing` win immediately. Otherwise the result is
    /// `NotLinked` or `Eos` only when every pad reports it, and `Ok` while any
    /// pad still accepts data.
    pub fn update(&mut self, pad: &str, result: FlowResult) -> FlowResult {
        if let Err(err) = result
            && (err.is_fatal() || err == FlowError::Flushing)
        {
            return Err(err);
        }
        self.last.insert(pad.to_owned(), result);

        if self.last.values().all(|r| *r == Err(FlowError::NotLinked)) {
            return Err(FlowError::NotLinked);
        }
        if self
            .last
            .values()
            .all(|r| matches!(r, Err(FlowError::Eos | FlowError::NotLinked)))
        {
            return Err(FlowError::Eos);
        }
        Ok(FlowSuccess::Ok)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_combiner_not_linked_needs_all() {
        let mut c = FlowCombiner::new();
        c.add_pad("src_0");
        c.add_pad("src_1");
        assert_eq!(c.update("src_0", Err(FlowError::NotLinked)), Ok(FlowSuccess::Ok));
        assert_eq!(
            c.update("src_1", Err(FlowError::NotLinked)),
            Err(FlowError::NotLinked)
        );
    }

    #[test]
    fn test_combiner_eos_needs_all() {
        let mut c = FlowCombiner::new();
        c.add_pad("a");
        c.add_pad("b");
        assert_eq!(c.update("a", Err(FlowError::Eos)), Ok(FlowSuccess::Ok));
        assert_eq!(c.update("b", Err(FlowError::Eos)), Err(FlowError::Eos));
        c.reset();
        assert_eq!(c.update("a", Ok(FlowSuccess::Ok)), Ok(FlowSuccess::Ok));
    }

    #[test]
    fn test_combiner_fatal_wins() {
        let mut c = FlowCombiner::new();
        c.add_pad("a");
        c.add_pad("b");
        assert_eq!(c.update("a", Err(FlowError::Error)), Err(FlowError::Error));
        assert_eq!(c.update("b", Err(FlowError::Flushing)), Err(FlowError::Flushing));
    }
}
