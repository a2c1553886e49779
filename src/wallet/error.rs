use serde::{Deserialize, Serialize};

/// Symbolic meaning of the numeric error codes a hub reports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ServerErrorKey {
    Unknown,
    BadAuth,
    LowBalance,
    BadPartner,
    InvalidInvoice,
    PrevInTransit,
    PaymentFailed,
    HubShutdown,
}

impl ServerErrorKey {
    pub fn from_code(code: i64) -> Self {
        match code {
            1 => ServerErrorKey::BadAuth,
            2 => ServerErrorKey::LowBalance,
            3 => ServerErrorKey::BadPartner,
            4 => ServerErrorKey::InvalidInvoice,
            9 => ServerErrorKey::PrevInTransit,
            10 => ServerErrorKey::PaymentFailed,
            11 => ServerErrorKey::HubShutdown,
            _ => ServerErrorKey::Unknown,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum WalletErrorKind {
    Unknown,
    InvalidRequest,
    ServerError,
    AnswerInvalid,
    NoConnection,
    RateLimited,
}

/// Everything a caller of the wallet layer can observe going wrong
#[derive(Debug, Clone, PartialEq, thiserror::Error, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum WalletError {
    #[error("Unknown wallet error: {message}")]
    Unknown { message: String },

    #[error("Invalid request: {message}")]
    InvalidRequest { message: String },

    #[error("Hub error {code} ({key:?}): {message}")]
    ServerError {
        code: i64,
        key: ServerErrorKey,
        message: String,
    },

    #[error("Invalid answer from hub: {message}")]
    AnswerInvalid { message: String },

    #[error("No connection to hub: {message}")]
    NoConnection { message: String },

    #[error("Rate limit exceeded")]
    RateLimited,
}

impl WalletError {
    pub fn unknown(message: impl Into<String>) -> Self {
        WalletError::Unknown {
            message: message.into(),
        }
    }

    pub fn invalid_request(message: impl Into<String>) -> Self {
        WalletError::InvalidRequest {
            message: message.into(),
        }
    }

    pub fn server(code: i64, message: impl Into<String>) -> Self {
        WalletError::ServerError {
            code,
            key: ServerErrorKey::from_code(code),
            message: message.into(),
        }
    }

    pub fn answer_invalid(message: impl Into<String>) -> Self {
        WalletError::AnswerInvalid {
            message: message.into(),
        }
    }

    pub fn no_connection(message: impl Into<String>) -> Self {
        WalletError::NoConnection {
            message: message.into(),
        }
    }

    pub fn kind(&self) -> WalletErrorKind {
        match self {
            WalletError::Unknown { .. } => WalletErrorKind::Unknown,
            WalletError::InvalidRequest { .. } => WalletErrorKind::InvalidRequest,
            WalletError::ServerError { .. } => WalletErrorKind::ServerError,
            WalletError::AnswerInvalid { .. } => WalletErrorKind::AnswerInvalid,
            WalletError::NoConnection { .. } => WalletErrorKind::NoConnection,
            WalletError::RateLimited => WalletErrorKind::RateLimited,
        }
    }

    pub fn server_key(&self) -> Option<ServerErrorKey> {
        match self {
            WalletError::ServerError { key, .. } => Some(*key),
            _ => None,
        }
    }

    pub fn is_bad_auth(&self) -> bool {
        self.server_key() == Some(ServerErrorKey::BadAuth)
    }
}

impl From<sqlx::Error> for WalletError {
    fn from(err: sqlx::Error) -> Self {
        WalletError::unknown(format!("Storage error: {}", err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_code_mapping() {
        assert_eq!(ServerErrorKey::from_code(1), ServerErrorKey::BadAuth);
        assert_eq!(ServerErrorKey::from_code(2), ServerErrorKey::LowBalance);
        assert_eq!(ServerErrorKey::from_code(9), ServerErrorKey::PrevInTransit);
        assert_eq!(ServerErrorKey::from_code(11), ServerErrorKey::HubShutdown);
        assert_eq!(ServerErrorKey::from_code(5), ServerErrorKey::Unknown);
    }

    #[test]
    fn test_serialized_shape_is_branchable() {
        let err = WalletError::server(1, "bad auth");
        let json = serde_json::to_value(&err).unwrap();
        assert_eq!(json["type"], "serverError");
        assert_eq!(json["key"], "badAuth");
        assert_eq!(json["code"], 1);

        let back: WalletError = serde_json::from_value(json).unwrap();
        assert!(back.is_bad_auth());
        assert_eq!(back.kind(), WalletErrorKind::ServerError);

        let limited = serde_json::to_value(WalletError::RateLimited).unwrap();
        assert_eq!(limited["type"], "rateLimited");
    }
}
