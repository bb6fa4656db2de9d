use thiserror::Error;

use crate::channel::ChannelError;
use crate::domain::conversation::MetadataError;
use crate::domain::order::OrderStatus;
use crate::flows::FlowTransitionError;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum DomainError {
    #[error("invalid order transition from {from:?} to {to:?}")]
    InvalidOrderTransition { from: OrderStatus, to: OrderStatus },
    #[error(transparent)]
    FlowTransition(#[from] FlowTransitionError),
    #[error(transparent)]
    Metadata(#[from] MetadataError),
    #[error("domain invariant violation: {0}")]
    InvariantViolation(String),
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ApplicationError {
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error("persistence failure: {0}")]
    Persistence(String),
    #[error("integration failure: {0}")]
    Integration(String),
    #[error(transparent)]
    Channel(#[from] ChannelError),
    #[error("configuration failure: {0}")]
    Configuration(String),
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum InterfaceError {
    #[error("bad request: {message}")]
    BadRequest { message: String, correlation_id: String },
    #[error("service unavailable: {message}")]
    ServiceUnavailable { message: String, correlation_id: String },
    #[error("internal error: {message}")]
    Internal { message: String, correlation_id: String },
}

impl InterfaceError {
    /// Reply sent to the customer in place of the failed turn.
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::BadRequest { .. } => "Sorry, I couldn't process that. Please try again.",
            Self::ServiceUnavailable { .. } => {
                "Something went wrong on our side. Please try again in a moment."
            }
            Self::Internal { .. } => "Something went wrong. Please try again.",
        }
    }
}

impl ApplicationError {
    pub fn into_interface(self, correlation_id: impl Into<String>) -> InterfaceError {
        let correlation_id = correlation_id.into();
        let mut mapped = InterfaceError::from(self);
        match &mut mapped {
            InterfaceError::BadRequest { correlation_id: id, .. }
            | InterfaceError::ServiceUnavailable { correlation_id: id, .. }
            | InterfaceError::Internal { correlation_id: id, .. } => *id = correlation_id,
        }
        mapped
    }
}

impl From<ApplicationError> for InterfaceError {
    fn from(value: ApplicationError) -> Self {
        match value {
            ApplicationError::Domain(DomainError::InvalidOrderTransition { .. })
            | ApplicationError::Domain(DomainError::FlowTransition(_))
            | ApplicationError::Domain(DomainError::Metadata(_))
            | ApplicationError::Domain(DomainError::InvariantViolation(_)) => Self::BadRequest {
                message: "domain validation failed".to_owned(),
                correlation_id: "unassigned".to_owned(),
            },
            ApplicationError::Persistence(message) | ApplicationError::Integration(message) => {
                Self::ServiceUnavailable { message, correlation_id: "unassigned".to_owned() }
            }
            ApplicationError::Channel(error) => Self::ServiceUnavailable {
                message: error.to_string(),
                correlation_id: "unassigned".to_owned(),
            },
            ApplicationError::Configuration(message) => {
                Self::Internal { message, correlation_id: "unassigned".to_owned() }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::channel::ChannelError;
    use crate::domain::order::OrderStatus;
    use crate::errors::{ApplicationError, DomainError, InterfaceError};

    #[test]
    fn domain_error_maps_to_bad_request_interface_error() {
        let interface = ApplicationError::from(DomainError::InvariantViolation(
            "cart line with zero quantity".to_owned(),
        ))
        .into_interface("req-1");

        assert!(matches!(
            interface,
            InterfaceError::BadRequest {
                ref correlation_id,
                ..
            } if correlation_id == "req-1"
        ));
    }

    #[test]
    fn bad_request_has_user_safe_message() {
        let interface = ApplicationError::from(DomainError::InvariantViolation(
            "cart line with zero quantity".to_owned(),
        ))
        .into_interface("req-2");

        assert_eq!(interface.user_message(), "Sorry, I couldn't process that. Please try again.");
    }

    #[test]
    fn persistence_error_maps_to_service_unavailable() {
        let interface = ApplicationError::Persistence("database lock timeout".to_owned())
            .into_interface("req-3");

        assert!(matches!(interface, InterfaceError::ServiceUnavailable { .. }));
        assert_eq!(
            interface.user_message(),
            "Something went wrong on our side. Please try again in a moment."
        );
    }

    #[test]
    fn channel_error_maps_to_service_unavailable() {
        let interface =
            ApplicationError::from(ChannelError::Transport("connection reset".to_owned()))
                .into_interface("whatsapp:wamid.7");

        assert!(matches!(
            interface,
            InterfaceError::ServiceUnavailable { ref correlation_id, .. }
                if correlation_id == "whatsapp:wamid.7"
        ));
    }

    #[test]
    fn invalid_order_transition_is_a_bad_request() {
        let interface = ApplicationError::from(DomainError::InvalidOrderTransition {
            from: OrderStatus::Cancelled,
            to: OrderStatus::Confirmed,
        })
        .into_interface("req-5");

        assert!(matches!(interface, InterfaceError::BadRequest { .. }));
    }

    #[test]
    fn configuration_error_maps_to_internal() {
        let interface = ApplicationError::Configuration("oracle api key missing".to_owned())
            .into_interface("req-4");

        assert!(matches!(interface, InterfaceError::Internal { .. }));
        assert_eq!(interface.user_message(), "Something went wrong. Please try again.");
    }
}
