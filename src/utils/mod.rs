use bcrypt::{hash, verify};
use uuid::Uuid;

pub const PASSWORD_SALT_ROUNDS: u32 = 12;

pub fn hash_password(password: &str) -> Result<String, bcrypt::BcryptError> {
    hash(password.as_bytes(), PASSWORD_SALT_ROUNDS)
}

pub fn verify_password(password: &str, hash: &str) -> Result<bool, bcrypt::BcryptError> {
    verify(password.as_bytes(), hash)
}

/// 时间有序的唯一标识，用于请求、审计和会话令牌
pub fn generate_id() -> Uuid {
    Uuid::now_v7()
}
