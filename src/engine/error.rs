/// Message shown when a save collides with an existing booking.
pub const CONFLICT_MESSAGE: &str =
    "Booking conflict. This equipment is already reserved for the selected dates.";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrackerError {
    /// Missing or malformed input; nothing was changed.
    Validation(String),
    /// The candidate range overlaps `booking_id` on the same equipment.
    Conflict { booking_id: String },
    NotFound(String),
    LimitExceeded(&'static str),
    /// The key-value backend rejected a read or write.
    Persistence(String),
}

impl TrackerError {
    pub fn is_conflict(&self) -> bool {
        matches!(self, TrackerError::Conflict { .. })
    }
}

impl std::fmt::Display for TrackerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TrackerError::Validation(msg) => write!(f, "{msg}"),
            TrackerError::Conflict { .. } => write!(f, "{CONFLICT_MESSAGE}"),
            TrackerError::NotFound(id) => write!(f, "not found: {id}"),
            TrackerError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            TrackerError::Persistence(e) => write!(f, "persistence error: {e}"),
        }
    }
}

impl std::error::Error for TrackerError {}

impl From<std::io::Error> for TrackerError {
    fn from(e: std::io::Error) -> Self {
        TrackerError::Persistence(e.to_string())
    }
}
