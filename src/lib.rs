pub mod audio;
pub mod capture;
pub mod config;
pub mod playback;
pub mod session;
pub mod transport;
pub mod vad;
pub mod voices;

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum VoxError {
    #[error("Audio device error: {0}")]
    AudioDeviceError(String),

    #[error("Transport error: {0}")]
    TransportError(String),

    #[error("Protocol error: {0}")]
    ProtocolError(String),

    #[error("Decode error: {0}")]
    DecodeError(String),

    #[error("Encode error: {0}")]
    EncodeError(String),

    #[error("Audio processing error: {0}")]
    AudioProcessingError(String),

    #[error("HTTP error: {0}")]
    HttpError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Channel error: {0}")]
    ChannelError(String),

    #[error("IO error: {0}")]
    IOError(String),
}

impl From<std::io::Error> for VoxError {
    fn from(e: std::io::Error) -> Self {
        VoxError::IOError(e.to_string())
    }
}

impl From<reqwest::Error> for VoxError {
    fn from(e: reqwest::Error) -> Self {
        VoxError::HttpError(e.to_string())
    }
}

impl From<hound::Error> for VoxError {
    fn from(e: hound::Error) -> Self {
        VoxError::EncodeError(e.to_string())
    }
}

impl VoxError {
    /// Check if this error is recoverable
    ///
    /// Recoverable errors are absorbed by the session loop; the others end
    /// the session.
    pub fn is_recoverable(&self) -> bool {
        match self {
            // Microphone denied or missing
            VoxError::AudioDeviceError(_) => false,
            // A dead channel needs a fresh connect
            VoxError::TransportError(_) => false,
            // One bad frame or message must not end the conversation
            VoxError::ProtocolError(_) => true,
            VoxError::DecodeError(_) => true,
            VoxError::EncodeError(_) => true,
            VoxError::AudioProcessingError(_) => true,
            VoxError::HttpError(_) => false,
            VoxError::ConfigError(_) => false,
            VoxError::ChannelError(_) => false,
            VoxError::IOError(_) => false,
        }
    }

    /// Whether the failure is shown to the user (the rest are only logged)
    pub fn is_user_visible(&self) -> bool {
        matches!(
            self,
            VoxError::AudioDeviceError(_) | VoxError::TransportError(_)
        )
    }

    /// Get a user-friendly description
    pub fn user_message(&self) -> String {
        match self {
            VoxError::AudioDeviceError(_) => {
                "Could not access the microphone. Please check permissions.".to_string()
            }
            VoxError::TransportError(_) => {
                "Connection error. Start a new session to try again.".to_string()
            }
            VoxError::ProtocolError(_) => "Received an unexpected message.".to_string(),
            VoxError::DecodeError(_) => "A reply could not be played.".to_string(),
            VoxError::EncodeError(_) => "Recorded audio could not be prepared.".to_string(),
            VoxError::AudioProcessingError(_) => {
                "Audio processing failed. Please try again.".to_string()
            }
            VoxError::HttpError(_) => "Could not reach the voice service.".to_string(),
            VoxError::ConfigError(_) => {
                "Configuration error. Please check settings.".to_string()
            }
            VoxError::ChannelError(_) => {
                "Internal communication error. Please restart the application.".to_string()
            }
            VoxError::IOError(_) => "File system error occurred.".to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, VoxError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_acquisition_and_transport_are_fatal() {
        assert!(!VoxError::AudioDeviceError("denied".into()).is_recoverable());
        assert!(!VoxError::TransportError("reset".into()).is_recoverable());
        assert!(VoxError::DecodeError("bad header".into()).is_recoverable());
        assert!(VoxError::ProtocolError("bad json".into()).is_recoverable());
    }

    #[test]
    fn test_user_visibility() {
        assert!(VoxError::AudioDeviceError("denied".into()).is_user_visible());
        assert!(VoxError::TransportError("reset".into()).is_user_visible());
        assert!(!VoxError::DecodeError("x".into()).is_user_visible());
        assert!(!VoxError::EncodeError("x".into()).is_user_visible());
    }

    #[test]
    fn test_io_conversion() {
        let err: VoxError = std::io::Error::new(std::io::ErrorKind::NotFound, "gone").into();
        assert!(matches!(err, VoxError::IOError(_)));
    }
}
