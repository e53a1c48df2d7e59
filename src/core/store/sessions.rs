use anyhow::Result;
use rusqlite::params;
use sha2::{Digest, Sha256};

use super::ConversationStore;
use super::types::{GoogleTokens, UserRecord};

fn hash_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    format!("{:x}", hasher.finalize())
}

fn generate_raw_token() -> String {
    let bytes: [u8; 16] = rand::random();
    let hex: String = bytes.iter().map(|b| format!("{:02x}", b)).collect();
    format!("dfk_{}", hex)
}

impl ConversationStore {
    pub async fn create_user(&self, email: &str, name: &str) -> Result<UserRecord> {
        let id = uuid::Uuid::new_v4().to_string();
        let db = self.db.lock().await;
        db.execute(
            "INSERT INTO users (id, email, name) VALUES (?1, ?2, ?3)",
            params![id, email, name],
        )?;
        let user = db.query_row(
            "SELECT id, email, name, created_at FROM users WHERE id = ?1",
            params![id],
            |row| {
                Ok(UserRecord {
                    id: row.get(0)?,
                    email: row.get(1)?,
                    name: row.get(2)?,
                    created_at: row.get(3)?,
                })
            },
        )?;
        Ok(user)
    }

    pub async fn get_user(&self, user_id: &str) -> Result<Option<UserRecord>> {
        let db = self.db.lock().await;
        let user = db
            .query_row(
                "SELECT id, email, name, created_at FROM users WHERE id = ?1",
                params![user_id],
                |row| {
                    Ok(UserRecord {
                        id: row.get(0)?,
                        email: row.get(1)?,
                        name: row.get(2)?,
                        created_at: row.get(3)?,
                    })
                },
            )
            .map(Some)
            .or_else(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => Ok(None),
                other => Err(other),
            })?;
        Ok(user)
    }

    /// Mint a bearer session token for a user. Only the SHA-256 hash is
    /// stored; the raw token is returned once and never again.
    pub async fn create_session(&self, user_id: &str) -> Result<String> {
        let raw_token = generate_raw_token();
        let token_hash = hash_token(&raw_token);
        let id = uuid::Uuid::new_v4().to_string();
        let db = self.db.lock().await;
        db.execute(
            "INSERT INTO sessions (id, token_hash, user_id) VALUES (?1, ?2, ?3)",
            params![id, token_hash, user_id],
        )?;
        Ok(raw_token)
    }

    /// Resolve a raw bearer token to its user id, if the session exists.
    pub async fn validate_session(&self, raw_token: &str) -> Result<Option<String>> {
        let token_hash = hash_token(raw_token);
        let db = self.db.lock().await;
        let user_id = db
            .query_row(
                "SELECT user_id FROM sessions WHERE token_hash = ?1",
                params![token_hash],
                |row| row.get::<_, String>(0),
            )
            .map(Some)
            .or_else(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => Ok(None),
                other => Err(other),
            })?;
        Ok(user_id)
    }

    pub async fn upsert_google_tokens(&self, user_id: &str, tokens: &GoogleTokens) -> Result<()> {
        let db = self.db.lock().await;
        db.execute(
            "INSERT OR REPLACE INTO google_tokens (user_id, access_token, refresh_token, id_token, expires_at) \
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                user_id,
                tokens.access_token,
                tokens.refresh_token,
                tokens.id_token,
                tokens.expires_at
            ],
        )?;
        Ok(())
    }

    pub async fn google_tokens(&self, user_id: &str) -> Result<Option<GoogleTokens>> {
        let db = self.db.lock().await;
        let tokens = db
            .query_row(
                "SELECT access_token, refresh_token, id_token, expires_at \
                 FROM google_tokens WHERE user_id = ?1",
                params![user_id],
                |row| {
                    Ok(GoogleTokens {
                        access_token: row.get(0)?,
                        refresh_token: row.get(1)?,
                        id_token: row.get(2)?,
                        expires_at: row.get(3)?,
                    })
                },
            )
            .map(Some)
            .or_else(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => Ok(None),
                other => Err(other),
            })?;
        Ok(tokens)
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_store;
    use super::super::types::GoogleTokens;

    #[tokio::test]
    async fn session_token_resolves_to_its_user() {
        let store = test_store().await;
        let user = store.create_user("a@example.com", "Alex").await.unwrap();
        let token = store.create_session(&user.id).await.unwrap();
        assert!(token.starts_with("dfk_"));

        let resolved = store.validate_session(&token).await.unwrap();
        assert_eq!(resolved.as_deref(), Some(user.id.as_str()));
        assert!(store.validate_session("dfk_bogus").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn google_tokens_upsert_overwrites() {
        let store = test_store().await;
        let tokens = GoogleTokens {
            access_token: "at-1".to_string(),
            refresh_token: Some("rt-1".to_string()),
            id_token: None,
            expires_at: Some("2026-09-01T00:00:00Z".to_string()),
        };
        store.upsert_google_tokens("u1", &tokens).await.unwrap();
        store
            .upsert_google_tokens(
                "u1",
                &GoogleTokens {
                    access_token: "at-2".to_string(),
                    ..tokens
                },
            )
            .await
            .unwrap();

        let current = store.google_tokens("u1").await.unwrap().unwrap();
        assert_eq!(current.access_token, "at-2");
        assert!(store.google_tokens("nobody").await.unwrap().is_none());
    }
}
