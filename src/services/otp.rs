//! Phone verification codes with cooldown and lockout.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use metrics::counter;
use once_cell::sync::Lazy;
use rand::Rng;
use regex::Regex;
use sea_orm::{
    sea_query::{Expr, OnConflict},
    ActiveValue::Set, ColumnTrait, Condition, DatabaseConnection, EntityTrait, QueryFilter,
};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};
use utoipa::ToSchema;

use crate::{
    config::OtpConfig,
    entities::otp_code::{self, Column, Entity as OtpCode},
    errors::ServiceError,
    services::notifications::{NotificationOutcome, Notifier, WhatsAppMessage},
    tracing::mask_phone,
};

static PHONE_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\+?[0-9]{8,15}$").expect("phone pattern compiles"));

/// Strips formatting and validates the result. `00` prefixes become `+`.
pub fn normalize_phone(raw: &str) -> Result<String, ServiceError> {
    let compact: String = raw
        .trim()
        .chars()
        .filter(|c| !matches!(c, ' ' | '-' | '(' | ')' | '.'))
        .collect();
    let compact = match compact.strip_prefix("00") {
        Some(rest) => format!("+{}", rest),
        None => compact,
    };
    if PHONE_PATTERN.is_match(&compact) {
        Ok(compact)
    } else {
        Err(ServiceError::ValidationError(format!(
            "Invalid phone number '{}'",
            raw.trim()
        )))
    }
}

fn generate_code() -> String {
    format!("{:06}", rand::thread_rng().gen_range(0..1_000_000))
}

fn codes_match(expected: &str, provided: &str) -> bool {
    if expected.len() != provided.len() {
        return false;
    }
    expected
        .bytes()
        .zip(provided.bytes())
        .fold(0u8, |acc, (a, b)| acc | (a ^ b))
        == 0
}

fn remaining_secs(until: DateTime<Utc>, now: DateTime<Utc>) -> u64 {
    (until - now).num_seconds().max(1) as u64
}

fn blocked(until: DateTime<Utc>, now: DateTime<Utc>) -> ServiceError {
    let secs = remaining_secs(until, now);
    ServiceError::RateLimited {
        message: format!(
            "Too many attempts. Try again in {} minute(s)",
            secs.div_ceil(60)
        ),
        retry_after_secs: secs,
    }
}

fn cooling_down(secs: u64) -> ServiceError {
    ServiceError::RateLimited {
        message: format!("Please wait {} seconds before requesting a new code", secs),
        retry_after_secs: secs,
    }
}

/// Why a new code cannot be sent yet for an existing record, if at all.
fn issue_refusal(
    record: &otp_code::Model,
    cooldown: Duration,
    now: DateTime<Utc>,
) -> Option<ServiceError> {
    if let Some(until) = record.blocked_until.filter(|u| *u > now) {
        counter!("servicehub.otp.rejected", 1, "reason" => "blocked");
        return Some(blocked(until, now));
    }
    let next_allowed = record.last_sent_at + cooldown;
    if next_allowed > now {
        counter!("servicehub.otp.rejected", 1, "reason" => "cooldown");
        return Some(cooling_down(remaining_secs(next_allowed, now)));
    }
    None
}

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct OtpRequest {
    pub phone: String,
}

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct OtpVerifyRequest {
    pub phone: String,
    pub code: String,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct OtpIssued {
    pub success: bool,
    pub message: String,
    pub expires_at: DateTime<Utc>,
}

#[derive(Clone)]
pub struct OtpService {
    db: Arc<DatabaseConnection>,
    config: OtpConfig,
    notifier: Arc<dyn Notifier>,
}

impl OtpService {
    pub fn new(db: Arc<DatabaseConnection>, config: OtpConfig, notifier: Arc<dyn Notifier>) -> Self {
        Self {
            db,
            config,
            notifier,
        }
    }

    pub fn config(&self) -> &OtpConfig {
        &self.config
    }

    /// Issues a fresh code, replacing any previous one for the phone.
    #[instrument(skip_all, fields(phone = %mask_phone(phone)))]
    pub async fn issue(&self, phone: &str) -> Result<OtpIssued, ServiceError> {
        let phone = normalize_phone(phone)?;
        let db = &*self.db;
        let now = Utc::now();
        let cooldown = Duration::seconds(self.config.cooldown_secs);

        if let Some(existing) = OtpCode::find_by_id(phone.clone()).one(db).await? {
            if let Some(refusal) = issue_refusal(&existing, cooldown, now) {
                return Err(refusal);
            }
        }

        let code = generate_code();
        let expires_at = now + Duration::seconds(self.config.ttl_secs);
        let record = otp_code::ActiveModel {
            phone: Set(phone.clone()),
            code: Set(code.clone()),
            expires_at: Set(expires_at),
            created_at: Set(now),
            attempts: Set(0),
            blocked_until: Set(None),
            last_sent_at: Set(now),
        };

        // The guard repeats the checks above inside the statement so two
        // concurrent requests cannot both pass them.
        let cutoff = now - cooldown;
        let written = OtpCode::insert(record)
            .on_conflict(
                OnConflict::column(Column::Phone)
                    .update_columns([
                        Column::Code,
                        Column::ExpiresAt,
                        Column::CreatedAt,
                        Column::Attempts,
                        Column::BlockedUntil,
                        Column::LastSentAt,
                    ])
                    .action_and_where(
                        Expr::col((OtpCode, Column::LastSentAt)).lte(cutoff).and(
                            Expr::col((OtpCode, Column::BlockedUntil))
                                .is_null()
                                .or(Expr::col((OtpCode, Column::BlockedUntil)).lte(now)),
                        ),
                    )
                    .to_owned(),
            )
            .exec_without_returning(db)
            .await?;
        if written == 0 {
            // Another request won the write; report the wait from what it stored
            let current = OtpCode::find_by_id(phone.clone()).one(db).await?;
            return Err(current
                .and_then(|record| issue_refusal(&record, cooldown, now))
                .unwrap_or_else(|| cooling_down(self.config.cooldown_secs.max(1) as u64)));
        }

        counter!("servicehub.otp.issued", 1);
        info!("verification code issued");

        let outcome = self
            .notifier
            .send_whatsapp(WhatsAppMessage {
                to: phone.clone(),
                body: format!(
                    "Your verification code is {}. It expires in {} minutes.",
                    code,
                    (self.config.ttl_secs / 60).max(1)
                ),
            })
            .await;
        if let NotificationOutcome::Failed(reason) = &outcome {
            counter!("servicehub.notifications.failed", 1, "channel" => "otp");
            warn!(reason = %reason, "verification code dispatch failed; code remains valid");
        }

        Ok(OtpIssued {
            success: true,
            message: "Verification code sent".to_string(),
            expires_at,
        })
    }

    /// Checks and consumes a code. Every guess reserves an attempt first;
    /// expired records are removed.
    #[instrument(skip_all, fields(phone = %mask_phone(phone)))]
    pub async fn verify(&self, phone: &str, code: &str) -> Result<(), ServiceError> {
        let phone = normalize_phone(phone)?;
        let code = code.trim();
        let db = &*self.db;
        let now = Utc::now();

        let record = OtpCode::find_by_id(phone.clone())
            .one(db)
            .await?
            .ok_or_else(|| ServiceError::BadRequest("Invalid or expired verification code".into()))?;

        if let Some(until) = record.blocked_until.filter(|u| *u > now) {
            return Err(blocked(until, now));
        }

        if now > record.expires_at {
            OtpCode::delete_many()
                .filter(Column::Phone.eq(phone.as_str()))
                .filter(Column::Code.eq(record.code.as_str()))
                .exec(db)
                .await?;
            return Err(ServiceError::BadRequest(
                "Verification code has expired".to_string(),
            ));
        }

        // Count the attempt and set the block in one statement, only while
        // unblocked. The code is compared only after its attempt is counted.
        let until = now + Duration::seconds(self.config.lockout_secs);
        let reserved = OtpCode::update_many()
            .col_expr(
                Column::BlockedUntil,
                Expr::case(
                    Expr::col(Column::Attempts).gte(self.config.max_attempts - 1),
                    Expr::value(Some(until)),
                )
                .finally(Expr::col(Column::BlockedUntil))
                .into(),
            )
            .col_expr(Column::Attempts, Expr::col(Column::Attempts).add(1))
            .filter(Column::Phone.eq(phone.as_str()))
            .filter(Column::Code.eq(record.code.as_str()))
            .filter(
                Condition::any()
                    .add(Column::BlockedUntil.is_null())
                    .add(Column::BlockedUntil.lte(now)),
            )
            .exec(db)
            .await?;
        if reserved.rows_affected == 0 {
            return Err(self.refusal(&phone, now).await?);
        }

        if !codes_match(&record.code, code) {
            let refusal = self.refusal(&phone, now).await?;
            if let ServiceError::RateLimited { .. } = refusal {
                counter!("servicehub.otp.locked", 1);
                warn!("verification locked after repeated failures");
            }
            return Err(refusal);
        }

        // Consume; only one concurrent verifier can delete the row
        let consumed = OtpCode::delete_many()
            .filter(Column::Phone.eq(phone.as_str()))
            .filter(Column::Code.eq(record.code.as_str()))
            .exec(db)
            .await?;
        if consumed.rows_affected == 0 {
            return Err(ServiceError::BadRequest(
                "Invalid or expired verification code".to_string(),
            ));
        }

        info!("verification code consumed");
        Ok(())
    }

    /// The error for a refused guess, read from the stored record.
    async fn refusal(&self, phone: &str, now: DateTime<Utc>) -> Result<ServiceError, ServiceError> {
        let current = OtpCode::find_by_id(phone.to_string()).one(&*self.db).await?;
        Ok(match current.and_then(|r| r.blocked_until).filter(|u| *u > now) {
            Some(until) => blocked(until, now),
            None => ServiceError::BadRequest("Invalid or expired verification code".to_string()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{services::notifications::LogNotifier, test_support};
    use assert_matches::assert_matches;

    fn service(db: Arc<DatabaseConnection>, cooldown_secs: i64) -> OtpService {
        OtpService::new(
            db,
            OtpConfig {
                cooldown_secs,
                max_attempts: 3,
                ..Default::default()
            },
            Arc::new(LogNotifier),
        )
    }

    async fn stored(db: &DatabaseConnection, phone: &str) -> Option<otp_code::Model> {
        OtpCode::find_by_id(phone.to_string()).one(db).await.unwrap()
    }

    #[test]
    fn phone_normalization() {
        assert_eq!(normalize_phone(" +20 100-123 4567 ").unwrap(), "+201001234567");
        assert_eq!(normalize_phone("00201001234567").unwrap(), "+201001234567");
        assert!(normalize_phone("12ab").is_err());
        assert!(normalize_phone("+1234").is_err());
    }

    #[test]
    fn generated_codes_are_six_digits() {
        for _ in 0..100 {
            let code = generate_code();
            assert_eq!(code.len(), 6);
            assert!(code.chars().all(|c| c.is_ascii_digit()));
        }
    }

    fn record(last_sent_ago: i64, blocked_for: Option<i64>) -> otp_code::Model {
        let now = Utc::now();
        otp_code::Model {
            phone: "+201001234567".to_string(),
            code: "123456".to_string(),
            expires_at: now + Duration::minutes(5),
            created_at: now - Duration::seconds(last_sent_ago),
            attempts: 0,
            blocked_until: blocked_for.map(|secs| now + Duration::seconds(secs)),
            last_sent_at: now - Duration::seconds(last_sent_ago),
        }
    }

    #[test]
    fn issue_wait_comes_from_the_stored_record() {
        let now = Utc::now();
        let cooldown = Duration::seconds(60);

        assert_matches!(
            issue_refusal(&record(10, Some(900)), cooldown, now),
            Some(ServiceError::RateLimited { message, retry_after_secs })
                if message.starts_with("Too many attempts") && retry_after_secs > 60
        );
        assert_matches!(
            issue_refusal(&record(20, None), cooldown, now),
            Some(ServiceError::RateLimited { message, retry_after_secs })
                if message.starts_with("Please wait") && (39..=40).contains(&retry_after_secs)
        );
        assert!(issue_refusal(&record(61, None), cooldown, now).is_none());
        // an elapsed block no longer counts
        assert!(issue_refusal(&record(61, Some(-5)), cooldown, now).is_none());
    }

    #[tokio::test]
    async fn concurrent_issues_send_one_code() {
        let db = test_support::memory_db().await;
        let otp = service(db.clone(), 60);

        let results =
            futures::future::join_all((0..5).map(|_| otp.issue("+201001234567"))).await;

        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        for refused in results.iter().filter_map(|r| r.as_ref().err()) {
            assert_matches!(
                refused,
                ServiceError::RateLimited { retry_after_secs, .. } if *retry_after_secs <= 60
            );
        }
    }

    #[tokio::test]
    async fn second_request_within_cooldown_is_rate_limited() {
        let db = test_support::memory_db().await;
        let otp = service(db.clone(), 60);

        let issued = otp.issue("+201001234567").await.unwrap();
        let record = stored(&db, "+201001234567").await.unwrap();
        assert_eq!(record.expires_at, issued.expires_at);
        assert_eq!(record.expires_at - record.created_at, Duration::minutes(5));

        assert_matches!(
            otp.issue("+201001234567").await,
            Err(ServiceError::RateLimited { retry_after_secs, .. }) if retry_after_secs <= 60
        );
    }

    #[tokio::test]
    async fn correct_code_is_consumed_once() {
        let db = test_support::memory_db().await;
        let otp = service(db.clone(), 0);
        otp.issue("+201001234567").await.unwrap();
        let code = stored(&db, "+201001234567").await.unwrap().code;

        otp.verify("+201001234567", &code).await.unwrap();
        assert!(stored(&db, "+201001234567").await.is_none());
        assert_matches!(
            otp.verify("+201001234567", &code).await,
            Err(ServiceError::BadRequest(_))
        );
    }

    #[tokio::test]
    async fn expired_code_fails_and_is_removed() {
        let db = test_support::memory_db().await;
        let otp = service(db.clone(), 0);
        otp.issue("+201001234567").await.unwrap();
        let code = stored(&db, "+201001234567").await.unwrap().code;

        OtpCode::update_many()
            .col_expr(Column::ExpiresAt, Expr::value(Utc::now() - Duration::seconds(1)))
            .exec(&*db)
            .await
            .unwrap();

        assert_matches!(
            otp.verify("+201001234567", &code).await,
            Err(ServiceError::BadRequest(msg)) if msg.contains("expired")
        );
        assert!(stored(&db, "+201001234567").await.is_none());
    }

    #[tokio::test]
    async fn repeated_wrong_codes_lock_the_phone() {
        let db = test_support::memory_db().await;
        let otp = service(db.clone(), 0);
        otp.issue("+201001234567").await.unwrap();
        let code = stored(&db, "+201001234567").await.unwrap().code;
        let wrong = if code == "000000" { "111111" } else { "000000" };

        for _ in 0..2 {
            assert_matches!(
                otp.verify("+201001234567", wrong).await,
                Err(ServiceError::BadRequest(_))
            );
        }
        assert_matches!(
            otp.verify("+201001234567", wrong).await,
            Err(ServiceError::RateLimited { .. })
        );
        // even the right code is refused while blocked
        assert_matches!(
            otp.verify("+201001234567", &code).await,
            Err(ServiceError::RateLimited { .. })
        );
        // and so is a new issuance
        assert_matches!(
            otp.issue("+201001234567").await,
            Err(ServiceError::RateLimited { .. })
        );
    }

    #[tokio::test]
    async fn concurrent_wrong_codes_never_exceed_the_allowance() {
        let db = test_support::memory_db().await;
        let otp = service(db.clone(), 0);
        otp.issue("+201001234567").await.unwrap();
        let code = stored(&db, "+201001234567").await.unwrap().code;
        let wrong = if code == "000000" { "111111" } else { "000000" };

        let results =
            futures::future::join_all((0..20).map(|_| otp.verify("+201001234567", wrong))).await;

        let rejected = results
            .iter()
            .filter(|r| matches!(r, Err(ServiceError::BadRequest(_))))
            .count();
        let limited = results
            .iter()
            .filter(|r| matches!(r, Err(ServiceError::RateLimited { .. })))
            .count();
        assert!(rejected <= 2, "{} guesses evaluated without a lock", rejected);
        assert_eq!(rejected + limited, 20);

        let record = stored(&db, "+201001234567").await.unwrap();
        assert_eq!(record.attempts, 3);
        assert!(record.blocked_until.unwrap() > Utc::now());
        assert_matches!(
            otp.verify("+201001234567", &code).await,
            Err(ServiceError::RateLimited { .. })
        );
    }

    #[tokio::test]
    async fn reissue_after_cooldown_resets_attempts() {
        let db = test_support::memory_db().await;
        let otp = service(db.clone(), 0);
        otp.issue("+201001234567").await.unwrap();
        let _ = otp.verify("+201001234567", "999999x").await;
        assert_eq!(stored(&db, "+201001234567").await.unwrap().attempts, 1);

        otp.issue("+201001234567").await.unwrap();
        assert_eq!(stored(&db, "+201001234567").await.unwrap().attempts, 0);
    }
}
