use trellismq_net::Builder;

use crate::Result;

#[derive(thiserror::Error, Debug)]
pub enum FitterError {
    #[error("the connection is disabled to keep alive")]
    ZeroKeepAliveDisabled,
}

/// Fits a client-requested keepalive into the listener's policy and
/// derives the idle window the session loop actually enforces.
pub struct Fitter<'a> {
    cfg: &'a Builder,
}

impl<'a> Fitter<'a> {
    pub fn new(cfg: &'a Builder) -> Self {
        Self { cfg }
    }

    /// Clamped keepalive in seconds. Zero means the client asked to
    /// disable keepalive entirely, allowed only when the listener says so.
    pub fn keep_alive(&self, keep_alive: u16) -> Result<u16> {
        if keep_alive == 0 {
            return if self.cfg.allow_zero_keepalive {
                Ok(0)
            } else {
                Err(FitterError::ZeroKeepAliveDisabled.into())
            };
        }
        Ok(keep_alive.clamp(self.cfg.min_keepalive, self.cfg.max_keepalive))
    }

    /// Idle window in seconds for a fitted keepalive: a short grace for
    /// small values, a backoff-scaled doubling otherwise.
    pub fn timeout_window(&self, keep_alive: u16) -> u16 {
        if keep_alive < 6 {
            keep_alive + 3
        } else {
            ((keep_alive as f32 * self.cfg.keepalive_backoff) * 2.0) as u16
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn builder() -> Builder {
        Builder::new().min_keepalive(10).max_keepalive(300).keepalive_backoff(0.75)
    }

    #[test]
    fn test_zero_keepalive_policy() {
        let cfg = builder().allow_zero_keepalive(true);
        assert_eq!(Fitter::new(&cfg).keep_alive(0).unwrap(), 0);

        let cfg = builder().allow_zero_keepalive(false);
        assert!(Fitter::new(&cfg).keep_alive(0).is_err());
    }

    #[test]
    fn test_clamping() {
        let cfg = builder();
        let fitter = Fitter::new(&cfg);
        assert_eq!(fitter.keep_alive(5).unwrap(), 10);
        assert_eq!(fitter.keep_alive(60).unwrap(), 60);
        assert_eq!(fitter.keep_alive(10_000).unwrap(), 300);
    }

    #[test]
    fn test_timeout_window() {
        let cfg = builder();
        let fitter = Fitter::new(&cfg);
        assert_eq!(fitter.timeout_window(5), 8);
        assert_eq!(fitter.timeout_window(60), 90);
    }
}
