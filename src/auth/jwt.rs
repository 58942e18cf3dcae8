use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{db::UserId, error::{ChatError, ChatResult}};

use super::Authenticator;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub user_id: UserId,
    pub exp: u64,
}

/// HS256 tokens signed with a shared secret.
pub struct JwtAuthenticator {
    key: DecodingKey,
    validation: Validation,
}

impl JwtAuthenticator {
    pub fn new(secret: &str) -> Self {
        Self {
            key: DecodingKey::from_secret(secret.as_bytes()),
            validation: Validation::new(Algorithm::HS256),
        }
    }
}

impl Authenticator for JwtAuthenticator {
    fn authenticate(&self, credential: &str) -> ChatResult<UserId> {
        let data = decode::<Claims>(credential, &self.key, &self.validation).map_err(|error| {
            debug!(%error, "token rejected");
            ChatError::Unauthorized("invalid token".to_owned())
        })?;
        if data.claims.user_id.is_empty() {
            return Err(ChatError::Unauthorized("token carries no user".to_owned()));
        }
        Ok(data.claims.user_id)
    }
}
