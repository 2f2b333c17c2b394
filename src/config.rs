/// Default MTU; MSS is derived as MTU minus the base header length.
pub const DEFAULT_MTU: usize = 1200;
/// Default flow-control window in bytes.
pub const DEFAULT_WINDOW: usize = 64 * 1024 - 1;
/// Default probability that a segment is routed onto the reliable channel.
pub const DEFAULT_PROB_RELIABLE: f64 = 0.5;

/// Config collects the tunables of a [`Transport`](crate::Transport) into a
/// single structure.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    mtu: usize,
    window: usize,
    prob_reliable: f64,
    sack_enabled: bool,
    verbose: bool,
}

impl Default for TransportConfig {
    fn default() -> Self {
        TransportConfig {
            mtu: DEFAULT_MTU,
            window: DEFAULT_WINDOW,
            prob_reliable: DEFAULT_PROB_RELIABLE,
            sack_enabled: true,
            verbose: false,
        }
    }
}

impl TransportConfig {
    pub fn new() -> Self {
        TransportConfig::default()
    }

    pub fn with_mtu(mut self, value: usize) -> Self {
        self.mtu = value;
        self
    }

    pub fn with_window(mut self, value: usize) -> Self {
        self.window = value;
        self
    }

    /// Probability in [0, 1] that a segment goes out on the reliable
    /// channel; values outside the range are clamped.
    pub fn with_prob_reliable(mut self, value: f64) -> Self {
        self.prob_reliable = value.max(0.0).min(1.0);
        self
    }

    pub fn with_sack_enabled(mut self, value: bool) -> Self {
        self.sack_enabled = value;
        self
    }

    pub fn with_verbose(mut self, value: bool) -> Self {
        self.verbose = value;
        self
    }

    pub fn mtu(&self) -> usize {
        self.mtu
    }

    pub fn window(&self) -> usize {
        self.window
    }

    pub fn prob_reliable(&self) -> f64 {
        self.prob_reliable
    }

    pub fn sack_enabled(&self) -> bool {
        self.sack_enabled
    }

    pub fn verbose(&self) -> bool {
        self.verbose
    }
}
