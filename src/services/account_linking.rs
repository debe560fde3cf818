//! Merging phone-only identities into email/password credentials.
//!
//! Nothing here touches an account until the caller has proven ownership of
//! the phone number with a one-time code.

use std::sync::Arc;

use argon2::{
    password_hash::{rand_core::OsRng, PasswordHasher, SaltString},
    Argon2,
};
use chrono::Utc;
use sea_orm::{
    sea_query::Expr, ActiveModelTrait, ActiveValue::Set, ColumnTrait, Condition,
    DatabaseConnection, EntityTrait, QueryFilter, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use crate::{
    entities::{
        auth_user::{self, Entity as AuthUser},
        customer::{self, Entity as Customer},
    },
    errors::{is_unique_violation, ServiceError},
    events::{Event, EventSender},
    services::otp::{normalize_phone, OtpService},
    tracing::{mask_email, mask_phone},
};

#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
pub struct LinkAccountRequest {
    pub phone: String,
    #[validate(email)]
    pub email: String,
    #[validate(length(min = 8, max = 128))]
    pub password: String,
    #[validate(length(min = 1, max = 200))]
    pub name: String,
    /// Proof of phone ownership; required
    pub otp: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
pub struct PhoneRegistrationRequest {
    pub phone: String,
    #[validate(length(min = 1, max = 200))]
    pub name: String,
    pub otp: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkOutcome {
    Linked { user_id: Uuid },
    /// No phone-only account; proceed with normal registration
    NotNeeded,
    AlreadyLinked,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct LinkAccountResponse {
    pub success: bool,
    pub linked: bool,
    pub message: String,
}

impl From<LinkOutcome> for LinkAccountResponse {
    fn from(outcome: LinkOutcome) -> Self {
        let (linked, message) = match outcome {
            LinkOutcome::Linked { .. } => (true, "Phone account linked to email"),
            LinkOutcome::NotNeeded => (false, "No phone account to link"),
            LinkOutcome::AlreadyLinked => (false, "Phone account is already linked"),
        };
        Self {
            success: true,
            linked,
            message: message.to_string(),
        }
    }
}

fn required_otp(otp: &Option<String>) -> Result<&str, ServiceError> {
    otp.as_deref()
        .map(str::trim)
        .filter(|c| !c.is_empty())
        .ok_or_else(|| ServiceError::MissingFields(vec!["otp".to_string()]))
}

pub fn hash_password(password: &str) -> Result<String, ServiceError> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| ServiceError::HashError(e.to_string()))
}

fn was_linked(user: &auth_user::Model) -> bool {
    user.metadata.get("linked_at").is_some()
}

#[derive(Clone)]
pub struct AccountLinkingService {
    db: Arc<DatabaseConnection>,
    otp: OtpService,
    event_sender: EventSender,
}

impl AccountLinkingService {
    pub fn new(db: Arc<DatabaseConnection>, otp: OtpService, event_sender: EventSender) -> Self {
        Self {
            db,
            otp,
            event_sender,
        }
    }

    /// Email used for accounts that only have a phone number.
    pub fn synthetic_email(&self, phone: &str) -> String {
        let digits: String = phone.chars().filter(char::is_ascii_digit).collect();
        format!("{}@{}", digits, self.otp.config().synthetic_email_domain)
    }

    fn is_synthetic(&self, email: &str) -> bool {
        email
            .rsplit_once('@')
            .map(|(_, domain)| domain.eq_ignore_ascii_case(&self.otp.config().synthetic_email_domain))
            .unwrap_or(false)
    }

    /// Creates a phone-only account once the phone has been verified.
    #[instrument(skip_all, fields(phone = %mask_phone(&request.phone)))]
    pub async fn register_phone_account(
        &self,
        request: PhoneRegistrationRequest,
    ) -> Result<auth_user::Model, ServiceError> {
        let code = required_otp(&request.otp)?;
        request.validate()?;
        let phone = normalize_phone(&request.phone)?;
        self.otp.verify(&phone, code).await?;

        let db = &*self.db;
        let now = Utc::now();
        let txn = db.begin().await?;
        let user = auth_user::ActiveModel {
            id: Set(Uuid::new_v4()),
            email: Set(self.synthetic_email(&phone)),
            password_hash: Set(None),
            phone: Set(Some(phone.clone())),
            email_confirmed: Set(false),
            metadata: Set(json!({ "name": request.name, "phone_only": true })),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&txn)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                ServiceError::Conflict("Phone number is already registered".to_string())
            } else {
                e.into()
            }
        })?;

        customer::ActiveModel {
            id: Set(Uuid::new_v4()),
            user_id: Set(Some(user.id)),
            name: Set(Some(request.name)),
            email: Set(None),
            phone: Set(Some(phone)),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&txn)
        .await?;
        txn.commit().await?;

        info!(user_id = %user.id, "phone-only account registered");
        Ok(user)
    }

    /// Links a verified phone-only account to an email/password credential.
    #[instrument(skip_all, fields(phone = %mask_phone(&request.phone), email = %mask_email(&request.email)))]
    pub async fn link(&self, request: LinkAccountRequest) -> Result<LinkOutcome, ServiceError> {
        // Proof of ownership comes first, before any lookup
        let code = required_otp(&request.otp)?.to_string();
        request.validate()?;
        let phone = normalize_phone(&request.phone)?;
        self.otp.verify(&phone, &code).await?;

        let db = &*self.db;
        let synthetic = self.synthetic_email(&phone);
        // Phone numbers are not unique across accounts. Only the synthetic
        // email, or the marker left by an earlier link, identifies the
        // account that started phone-only.
        let mut candidates = AuthUser::find()
            .filter(
                Condition::any()
                    .add(auth_user::Column::Email.eq(synthetic.as_str()))
                    .add(auth_user::Column::Phone.eq(phone.as_str())),
            )
            .all(db)
            .await?;
        let chosen = candidates
            .iter()
            .position(|user| user.email == synthetic)
            .or_else(|| candidates.iter().position(was_linked));
        let Some(account) = chosen.map(|i| candidates.swap_remove(i)) else {
            info!("no phone-only account found");
            return Ok(LinkOutcome::NotNeeded);
        };

        if !self.is_synthetic(&account.email) {
            info!(user_id = %account.id, "account already has an email");
            return Ok(LinkOutcome::AlreadyLinked);
        }

        let password_hash = hash_password(&request.password)?;
        let email = request.email.trim().to_ascii_lowercase();
        let mut metadata = account.metadata.clone();
        if let Some(map) = metadata.as_object_mut() {
            map.insert("name".into(), json!(request.name));
            map.insert("phone_only".into(), json!(false));
            map.insert("linked_at".into(), json!(Utc::now()));
        } else {
            metadata = json!({ "name": request.name, "phone_only": false, "linked_at": Utc::now() });
        }

        let now = Utc::now();
        let txn = db.begin().await?;
        let updated = AuthUser::update_many()
            .col_expr(auth_user::Column::Email, Expr::value(email.clone()))
            .col_expr(auth_user::Column::PasswordHash, Expr::value(Some(password_hash)))
            .col_expr(auth_user::Column::EmailConfirmed, Expr::value(false))
            .col_expr(auth_user::Column::Metadata, Expr::value(metadata))
            .col_expr(auth_user::Column::UpdatedAt, Expr::value(now))
            .filter(auth_user::Column::Id.eq(account.id))
            .filter(auth_user::Column::Email.eq(account.email.as_str()))
            .exec(&txn)
            .await
            .map_err(|e| {
                if is_unique_violation(&e) {
                    warn!(user_id = %account.id, "email already belongs to another account");
                    ServiceError::Conflict("Email is already registered".to_string())
                } else {
                    e.into()
                }
            })?;
        if updated.rows_affected == 0 {
            return Ok(LinkOutcome::AlreadyLinked);
        }

        Customer::update_many()
            .col_expr(customer::Column::Email, Expr::value(Some(email)))
            .col_expr(customer::Column::Name, Expr::value(Some(request.name.clone())))
            .col_expr(customer::Column::UpdatedAt, Expr::value(now))
            .filter(customer::Column::UserId.eq(account.id))
            .exec(&txn)
            .await?;
        txn.commit().await?;

        info!(user_id = %account.id, "phone account linked");
        self.event_sender
            .send_or_log(Event::AccountLinked {
                user_id: account.id,
            })
            .await;

        Ok(LinkOutcome::Linked {
            user_id: account.id,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::OtpConfig, entities::otp_code, events, services::notifications::LogNotifier,
        test_support,
    };
    use argon2::{PasswordHash, PasswordVerifier};
    use assert_matches::assert_matches;
    use sea_orm::PaginatorTrait;

    const PHONE: &str = "+201001234567";

    fn service(db: Arc<DatabaseConnection>) -> AccountLinkingService {
        let otp = OtpService::new(
            db.clone(),
            OtpConfig {
                cooldown_secs: 0,
                ..Default::default()
            },
            Arc::new(LogNotifier),
        );
        let (sender, _rx) = events::channel(8);
        AccountLinkingService::new(db, otp, sender)
    }

    async fn fresh_code(linking: &AccountLinkingService, db: &DatabaseConnection) -> String {
        linking.otp.issue(PHONE).await.unwrap();
        otp_code::Entity::find_by_id(PHONE.to_string())
            .one(db)
            .await
            .unwrap()
            .unwrap()
            .code
    }

    fn link_request(otp: Option<String>) -> LinkAccountRequest {
        LinkAccountRequest {
            phone: PHONE.into(),
            email: "amira@example.com".into(),
            password: "correct horse battery".into(),
            name: "Amira Hassan".into(),
            otp,
        }
    }

    #[test]
    fn hashes_verify() {
        let hash = hash_password("s3cret-pass").unwrap();
        let parsed = PasswordHash::new(&hash).unwrap();
        assert!(Argon2::default()
            .verify_password(b"s3cret-pass", &parsed)
            .is_ok());
    }

    #[tokio::test]
    async fn missing_otp_is_rejected_before_anything_else() {
        let db = test_support::memory_db().await;
        let linking = service(db.clone());
        assert_matches!(
            linking.link(link_request(None)).await,
            Err(ServiceError::MissingFields(fields)) if fields == vec!["otp".to_string()]
        );
        assert_matches!(
            linking.link(link_request(Some("  ".into()))).await,
            Err(ServiceError::MissingFields(_))
        );
    }

    #[tokio::test]
    async fn wrong_otp_leaves_account_untouched() {
        let db = test_support::memory_db().await;
        let linking = service(db.clone());
        let code = fresh_code(&linking, &db).await;
        let user = linking
            .register_phone_account(PhoneRegistrationRequest {
                phone: PHONE.into(),
                name: "Amira".into(),
                otp: Some(code),
            })
            .await
            .unwrap();

        fresh_code(&linking, &db).await;
        assert_matches!(
            linking.link(link_request(Some("not-it".into()))).await,
            Err(ServiceError::BadRequest(_))
        );
        let stored = AuthUser::find_by_id(user.id).one(&*db).await.unwrap().unwrap();
        assert_eq!(stored.email, linking.synthetic_email(PHONE));
        assert!(stored.password_hash.is_none());
    }

    #[tokio::test]
    async fn links_phone_account_and_customer_profile() {
        let db = test_support::memory_db().await;
        let linking = service(db.clone());
        let code = fresh_code(&linking, &db).await;
        let user = linking
            .register_phone_account(PhoneRegistrationRequest {
                phone: PHONE.into(),
                name: "Amira".into(),
                otp: Some(code),
            })
            .await
            .unwrap();
        assert_eq!(user.email, "201001234567@phone.servicehub.local");

        let code = fresh_code(&linking, &db).await;
        let outcome = linking.link(link_request(Some(code))).await.unwrap();
        assert_eq!(outcome, LinkOutcome::Linked { user_id: user.id });

        let stored = AuthUser::find_by_id(user.id).one(&*db).await.unwrap().unwrap();
        assert_eq!(stored.email, "amira@example.com");
        assert!(!stored.email_confirmed);
        assert!(stored.password_hash.is_some());
        assert_eq!(stored.metadata["name"], "Amira Hassan");

        let profile = Customer::find()
            .filter(customer::Column::UserId.eq(user.id))
            .one(&*db)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(profile.email.as_deref(), Some("amira@example.com"));
        assert_eq!(profile.name.as_deref(), Some("Amira Hassan"));

        // OTP was consumed
        assert_eq!(otp_code::Entity::find().count(&*db).await.unwrap(), 0);

        // a second link finds an account that already has an email
        let code = fresh_code(&linking, &db).await;
        assert_eq!(
            linking.link(link_request(Some(code))).await.unwrap(),
            LinkOutcome::AlreadyLinked
        );
    }

    #[tokio::test]
    async fn no_phone_account_means_no_linking() {
        let db = test_support::memory_db().await;
        let linking = service(db.clone());
        let code = fresh_code(&linking, &db).await;
        assert_eq!(
            linking.link(link_request(Some(code))).await.unwrap(),
            LinkOutcome::NotNeeded
        );
    }

    #[tokio::test]
    async fn email_account_sharing_the_phone_is_ignored() {
        let db = test_support::memory_db().await;
        let linking = service(db.clone());
        let other = test_support::seed_email_user(&db, "other@example.com").await;
        AuthUser::update_many()
            .col_expr(auth_user::Column::Phone, Expr::value(Some(PHONE.to_string())))
            .filter(auth_user::Column::Id.eq(other.id))
            .exec(&*db)
            .await
            .unwrap();

        let code = fresh_code(&linking, &db).await;
        let user = linking
            .register_phone_account(PhoneRegistrationRequest {
                phone: PHONE.into(),
                name: "Amira".into(),
                otp: Some(code),
            })
            .await
            .unwrap();

        let code = fresh_code(&linking, &db).await;
        assert_eq!(
            linking.link(link_request(Some(code))).await.unwrap(),
            LinkOutcome::Linked { user_id: user.id }
        );
        let linked = AuthUser::find_by_id(user.id).one(&*db).await.unwrap().unwrap();
        assert_eq!(linked.email, "amira@example.com");
        let untouched = AuthUser::find_by_id(other.id).one(&*db).await.unwrap().unwrap();
        assert_eq!(untouched.email, "other@example.com");
        assert_eq!(untouched.password_hash, other.password_hash);

        // with only the ordinary account left holding the phone, nothing needs linking
        AuthUser::delete_by_id(user.id).exec(&*db).await.unwrap();
        let code = fresh_code(&linking, &db).await;
        assert_eq!(
            linking.link(link_request(Some(code))).await.unwrap(),
            LinkOutcome::NotNeeded
        );
    }

    #[tokio::test]
    async fn email_collision_is_a_conflict() {
        let db = test_support::memory_db().await;
        let linking = service(db.clone());
        test_support::seed_email_user(&db, "amira@example.com").await;

        let code = fresh_code(&linking, &db).await;
        linking
            .register_phone_account(PhoneRegistrationRequest {
                phone: PHONE.into(),
                name: "Amira".into(),
                otp: Some(code),
            })
            .await
            .unwrap();

        let code = fresh_code(&linking, &db).await;
        assert_matches!(
            linking.link(link_request(Some(code))).await,
            Err(ServiceError::Conflict(_))
        );
    }
}
