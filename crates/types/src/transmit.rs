use core::fmt;

/// Stage of a transfer, reported alongside the cumulative byte count.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum TransmitStatus {
    Success,
    ConvertingToObject,
    Transmitting,
    Failed,
    Error,
}

impl TransmitStatus {
    /// Terminal reports close a transfer and are never throttled.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Success | Self::Failed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::ConvertingToObject => "converting",
            Self::Transmitting => "transmitting",
            Self::Failed => "failed",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for TransmitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
