use thiserror::Error;

/// Provider-agnostic reasons a payment method is refused.
///
/// Every provider maps its native codes onto this list so callers only ever
/// see the messages below.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CardErrorCode {
    InvalidNumber,
    InvalidExpiryMonth,
    InvalidExpiryYear,
    InvalidCvc,
    InvalidSwipeData,
    IncorrectNumber,
    ExpiredCard,
    IncorrectCvc,
    IncorrectZip,
    CardDeclined,
    Missing,
    ProcessingError,
    InvalidAmount,
    Refused,
}

impl CardErrorCode {
    pub fn message(&self) -> &'static str {
        match self {
            CardErrorCode::InvalidNumber => "The card number is not a valid credit card number.",
            CardErrorCode::InvalidExpiryMonth => "The card's expiration month is invalid.",
            CardErrorCode::InvalidExpiryYear => "The card's expiration year is invalid.",
            CardErrorCode::InvalidCvc => "The card's security code is invalid.",
            CardErrorCode::InvalidSwipeData => "The card's swipe data is invalid.",
            CardErrorCode::IncorrectNumber => "The card number is incorrect.",
            CardErrorCode::ExpiredCard => "The card has expired.",
            CardErrorCode::IncorrectCvc => "The card's security code is incorrect.",
            CardErrorCode::IncorrectZip => "The card's zip code failed validation.",
            CardErrorCode::CardDeclined => "The card was declined.",
            CardErrorCode::Missing => "There is no card on a customer that is being charged.",
            CardErrorCode::ProcessingError => "An error occurred while processing the card.",
            CardErrorCode::InvalidAmount => "The payment amount is invalid.",
            CardErrorCode::Refused => "The payment was refused.",
        }
    }

    /// Stripe `error.code` values.
    pub fn from_stripe(code: &str) -> Option<Self> {
        Some(match code {
            "invalid_number" => CardErrorCode::InvalidNumber,
            "invalid_expiry_month" => CardErrorCode::InvalidExpiryMonth,
            "invalid_expiry_year" => CardErrorCode::InvalidExpiryYear,
            "invalid_cvc" => CardErrorCode::InvalidCvc,
            "invalid_swipe_data" => CardErrorCode::InvalidSwipeData,
            "incorrect_number" => CardErrorCode::IncorrectNumber,
            "expired_card" => CardErrorCode::ExpiredCard,
            "incorrect_cvc" => CardErrorCode::IncorrectCvc,
            "incorrect_zip" => CardErrorCode::IncorrectZip,
            "card_declined" => CardErrorCode::CardDeclined,
            "missing" => CardErrorCode::Missing,
            "processing_error" => CardErrorCode::ProcessingError,
            "amount_too_small" | "amount_too_large" => CardErrorCode::InvalidAmount,
            _ => return None,
        })
    }

    /// Adyen `refusalReason` values and validation `errorCode` values.
    pub fn from_adyen(code: &str) -> Self {
        match code {
            "101" | "Invalid Card Number" => CardErrorCode::InvalidNumber,
            "103" | "CVC Declined" => CardErrorCode::InvalidCvc,
            "Expired Card" => CardErrorCode::ExpiredCard,
            "129" | "Invalid Amount" => CardErrorCode::InvalidAmount,
            "Not enough balance" | "Declined Non Generic" | "Blocked Card" => {
                CardErrorCode::CardDeclined
            }
            "Acquirer Error" | "Issuer Unavailable" => CardErrorCode::ProcessingError,
            _ => CardErrorCode::Refused,
        }
    }
}

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("{}", .0.message())]
    Card(CardErrorCode),

    #[error("Provider API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("Provider authentication failed")]
    Unauthorized,

    #[error("Provider request timed out")]
    Timeout,

    #[error("Provider request failed: {0}")]
    Transport(String),

    #[error("Invalid response from provider: {0}")]
    InvalidResponse(String),

    #[error("Invalid webhook payload: {0}")]
    InvalidPayload(String),

    #[error("Invalid webhook signature")]
    InvalidSignature,

    #[error("Missing credential field: {0}")]
    MissingCredential(&'static str),
}

impl From<reqwest::Error> for ProviderError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ProviderError::Timeout
        } else if err.is_decode() {
            ProviderError::InvalidResponse(err.to_string())
        } else {
            ProviderError::Transport(err.to_string())
        }
    }
}

impl ProviderError {
    pub fn is_decline(&self) -> bool {
        matches!(self, ProviderError::Card(_))
    }

    /// Whether the same call may succeed later without any change on our side.
    pub fn is_transient(&self) -> bool {
        match self {
            ProviderError::Timeout | ProviderError::Transport(_) => true,
            ProviderError::Api { status, .. } => *status >= 500 || *status == 429,
            _ => false,
        }
    }
}
