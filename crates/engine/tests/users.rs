use std::sync::{Arc, Mutex};

use chrono::{TimeDelta, TimeZone, Utc};
use sea_orm::Database;

use engine::{
    Actor, Engine, EngineError, ExpenseFilter, ExpenseKind, FixedClock, MailError, Mailer,
    NewExpense, NewUser, ProfilePatch, Role,
};
use migration::MigratorTrait;

#[derive(Default)]
struct RecordingMailer {
    sent: Mutex<Vec<(String, String, String)>>,
}

impl RecordingMailer {
    fn count(&self) -> usize {
        self.sent.lock().unwrap().len()
    }

    /// Token of the last mail whose link contains `path`.
    fn last_token(&self, path: &str) -> String {
        let sent = self.sent.lock().unwrap();
        let (_, _, body) = sent
            .iter()
            .rev()
            .find(|(_, _, body)| body.contains(path))
            .expect("no matching mail");
        let start = body.find("token=").expect("link without token") + "token=".len();
        body[start..start + 64].to_string()
    }
}

#[async_trait::async_trait]
impl Mailer for RecordingMailer {
    async fn send(&self, to: &str, subject: &str, html_body: &str) -> Result<(), MailError> {
        self.sent.lock().unwrap().push((
            to.to_string(),
            subject.to_string(),
            html_body.to_string(),
        ));
        Ok(())
    }
}

struct FailingMailer;

#[async_trait::async_trait]
impl Mailer for FailingMailer {
    async fn send(&self, _to: &str, _subject: &str, _html_body: &str) -> Result<(), MailError> {
        Err(MailError("smtp unreachable".to_string()))
    }
}

async fn engine_with(mailer: Arc<dyn Mailer>) -> (Engine, Arc<FixedClock>) {
    let db = Database::connect("sqlite::memory:").await.unwrap();
    migration::Migrator::up(&db, None).await.unwrap();
    let clock = Arc::new(FixedClock::new(
        Utc.with_ymd_and_hms(2024, 3, 1, 8, 0, 0).unwrap(),
    ));
    let engine = Engine::builder()
        .database(db)
        .clock(clock.clone())
        .mailer(mailer)
        .app_url("https://mindoh.example")
        .build()
        .await
        .unwrap();
    (engine, clock)
}

fn alice() -> NewUser {
    NewUser {
        username: "alice".to_string(),
        email: "Alice@Example.com".to_string(),
        password: "password123".to_string(),
        name: Some("Alice".to_string()),
    }
}

fn bob() -> NewUser {
    NewUser {
        username: "bob".to_string(),
        email: "bob@example.com".to_string(),
        password: "password456".to_string(),
        name: None,
    }
}

fn lunch(user_id: i64) -> NewExpense {
    NewExpense {
        user_id: Some(user_id),
        amount: -120_000.0,
        currency: "VND".to_string(),
        kind: ExpenseKind::Expense,
        expense_type: "food".to_string(),
        resource: None,
        description: None,
        date: Some("2024-02-20".to_string()),
    }
}

#[tokio::test]
async fn register_then_verify_email() {
    let mailer = Arc::new(RecordingMailer::default());
    let (engine, _clock) = engine_with(mailer.clone()).await;

    let user = engine.register(alice()).await.unwrap();
    assert_eq!(user.email, "alice@example.com");
    assert_eq!(user.role, Role::User);
    assert!(!user.is_email_verified);
    assert_eq!(mailer.count(), 1);

    let token = mailer.last_token("/verify-email");
    let verified = engine.verify_email(&token).await.unwrap();
    assert!(verified.is_email_verified);

    // Single use.
    assert!(matches!(
        engine.verify_email(&token).await,
        Err(EngineError::InvalidToken(_))
    ));
}

#[tokio::test]
async fn duplicate_username_or_email_conflicts() {
    let (engine, _clock) = engine_with(Arc::new(RecordingMailer::default())).await;
    engine.register(alice()).await.unwrap();

    let err = engine.register(alice()).await.unwrap_err();
    assert_eq!(err, EngineError::ExistingKey("username".to_string()));

    let mut same_email = alice();
    same_email.username = "alice2".to_string();
    let err = engine.register(same_email).await.unwrap_err();
    assert_eq!(err, EngineError::ExistingKey("email".to_string()));
}

#[tokio::test]
async fn verification_token_expires_after_a_day() {
    let mailer = Arc::new(RecordingMailer::default());
    let (engine, clock) = engine_with(mailer.clone()).await;
    engine.register(alice()).await.unwrap();
    let token = mailer.last_token("/verify-email");

    clock.advance(TimeDelta::hours(25));
    assert!(matches!(
        engine.verify_email(&token).await,
        Err(EngineError::InvalidToken(_))
    ));

    engine
        .resend_verification("alice@example.com")
        .await
        .unwrap();
    let fresh = mailer.last_token("/verify-email");
    assert_ne!(fresh, token);
    assert!(engine.verify_email(&fresh).await.unwrap().is_email_verified);

    // Verified accounts get nothing more.
    let before = mailer.count();
    engine
        .resend_verification("alice@example.com")
        .await
        .unwrap();
    assert_eq!(mailer.count(), before);
}

#[tokio::test]
async fn forgot_password_is_silent_for_unknown_and_unverified() {
    let mailer = Arc::new(RecordingMailer::default());
    let (engine, _clock) = engine_with(mailer.clone()).await;
    engine.register(alice()).await.unwrap();
    let after_register = mailer.count();

    engine.forgot_password("nobody@example.com").await.unwrap();
    engine.forgot_password("alice@example.com").await.unwrap();
    assert_eq!(mailer.count(), after_register);
}

#[tokio::test]
async fn password_reset_flow() {
    let mailer = Arc::new(RecordingMailer::default());
    let (engine, clock) = engine_with(mailer.clone()).await;
    engine.register(alice()).await.unwrap();
    engine
        .verify_email(&mailer.last_token("/verify-email"))
        .await
        .unwrap();

    engine.forgot_password("alice@example.com").await.unwrap();
    let token = mailer.last_token("/reset-password");

    clock.advance(TimeDelta::minutes(30));
    engine
        .reset_password(&token, "new-password-1")
        .await
        .unwrap();

    assert_eq!(
        engine.authenticate("alice", "password123").await.unwrap_err(),
        EngineError::InvalidCredentials
    );
    assert!(engine.authenticate("alice", "new-password-1").await.is_ok());
    assert!(matches!(
        engine.reset_password(&token, "another-pass").await,
        Err(EngineError::InvalidToken(_))
    ));
}

#[tokio::test]
async fn reset_token_expires_after_an_hour() {
    let mailer = Arc::new(RecordingMailer::default());
    let (engine, clock) = engine_with(mailer.clone()).await;
    engine.register(alice()).await.unwrap();
    engine
        .verify_email(&mailer.last_token("/verify-email"))
        .await
        .unwrap();
    engine.forgot_password("alice@example.com").await.unwrap();
    let token = mailer.last_token("/reset-password");

    clock.advance(TimeDelta::minutes(61));
    assert!(matches!(
        engine.reset_password(&token, "new-password-1").await,
        Err(EngineError::InvalidToken(_))
    ));
}

#[tokio::test]
async fn change_password_requires_current_one() {
    let (engine, _clock) = engine_with(Arc::new(RecordingMailer::default())).await;
    let user = engine.register(alice()).await.unwrap();

    assert_eq!(
        engine
            .change_password(user.id, "wrong-password", "new-password-1")
            .await
            .unwrap_err(),
        EngineError::InvalidCredentials
    );
    assert!(matches!(
        engine.change_password(user.id, "password123", "short").await,
        Err(EngineError::InvalidInput(_))
    ));
    engine
        .change_password(user.id, "password123", "new-password-1")
        .await
        .unwrap();
    assert!(engine.authenticate("alice", "new-password-1").await.is_ok());
}

#[tokio::test]
async fn profile_update_and_email_change() {
    let mailer = Arc::new(RecordingMailer::default());
    let (engine, _clock) = engine_with(mailer.clone()).await;
    let user = engine.register(alice()).await.unwrap();
    engine
        .verify_email(&mailer.last_token("/verify-email"))
        .await
        .unwrap();

    let updated = engine
        .update_profile(
            user.id,
            ProfilePatch {
                phone: Some("+84 123".to_string()),
                birthdate: Some("1990-05-01".to_string()),
                name: Some(String::new()),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(updated.phone.as_deref(), Some("+84 123"));
    assert_eq!(updated.birthdate.as_deref(), Some("1990-05-01"));
    assert_eq!(updated.name, None);
    assert!(updated.is_email_verified);

    assert!(matches!(
        engine
            .update_profile(
                user.id,
                ProfilePatch {
                    birthdate: Some("01/05/1990".to_string()),
                    ..Default::default()
                },
            )
            .await,
        Err(EngineError::InvalidDate(_))
    ));

    let moved = engine
        .update_profile(
            user.id,
            ProfilePatch {
                email: Some("alice@new.example".to_string()),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(moved.email, "alice@new.example");
    assert!(!moved.is_email_verified);
    let token = mailer.last_token("/verify-email");
    assert!(engine.verify_email(&token).await.unwrap().is_email_verified);
}

#[tokio::test]
async fn mail_failures_do_not_fail_registration() {
    let (engine, _clock) = engine_with(Arc::new(FailingMailer)).await;
    let user = engine.register(alice()).await.unwrap();
    assert_eq!(engine.user(user.id).await.unwrap().username, "alice");
}

#[tokio::test]
async fn unknown_user_cannot_authenticate() {
    let (engine, _clock) = engine_with(Arc::new(RecordingMailer::default())).await;
    assert_eq!(
        engine.authenticate("ghost", "password123").await.unwrap_err(),
        EngineError::InvalidCredentials
    );
    assert!(matches!(
        engine.user(42).await,
        Err(EngineError::KeyNotFound(_))
    ));
}

#[tokio::test]
async fn accounts_are_visible_to_self_and_admins() {
    let (engine, _clock) = engine_with(Arc::new(RecordingMailer::default())).await;
    let alice = engine.register(alice()).await.unwrap();
    let bob = engine.register(bob()).await.unwrap();
    engine.set_role("bob", Role::Admin).await.unwrap();
    let as_alice = Actor::new(alice.id, Role::User);
    let as_admin = Actor::new(bob.id, Role::Admin);

    assert_eq!(
        engine.user_as(alice.id, &as_alice).await.unwrap().username,
        "alice"
    );
    assert!(matches!(
        engine.user_as(bob.id, &as_alice).await,
        Err(EngineError::Forbidden(_))
    ));
    assert_eq!(
        engine.user_as(alice.id, &as_admin).await.unwrap().username,
        "alice"
    );
    assert_eq!(
        engine.user_as(999, &as_admin).await.unwrap_err(),
        EngineError::KeyNotFound("user".to_string())
    );
}

#[tokio::test]
async fn admin_deletes_account_and_its_expenses() {
    let (engine, _clock) = engine_with(Arc::new(RecordingMailer::default())).await;
    let alice = engine.register(alice()).await.unwrap();
    let bob = engine.register(bob()).await.unwrap();
    engine.set_role("bob", Role::Admin).await.unwrap();
    let as_alice = Actor::new(alice.id, Role::User);
    let as_admin = Actor::new(bob.id, Role::Admin);

    engine.add_expense(&as_alice, lunch(alice.id)).await.unwrap();
    let gone = engine.add_expense(&as_alice, lunch(alice.id)).await.unwrap();
    engine.delete_expense(gone.id, &as_alice).await.unwrap();
    engine.add_expense(&as_admin, lunch(bob.id)).await.unwrap();

    assert!(matches!(
        engine.delete_user(bob.id, &as_alice).await,
        Err(EngineError::Forbidden(_))
    ));

    engine.delete_user(alice.id, &as_admin).await.unwrap();

    assert!(matches!(
        engine.user(alice.id).await,
        Err(EngineError::KeyNotFound(_))
    ));
    assert_eq!(
        engine.authenticate("alice", "password123").await.unwrap_err(),
        EngineError::InvalidCredentials
    );
    let left = engine
        .list_all_expenses(&as_admin, ExpenseFilter::default())
        .await
        .unwrap();
    assert_eq!(left.len(), 1);
    assert_eq!(left[0].user_id, bob.id);

    assert_eq!(
        engine.delete_user(alice.id, &as_admin).await.unwrap_err(),
        EngineError::KeyNotFound("user".to_string())
    );
}

#[tokio::test]
async fn users_can_delete_their_own_account() {
    let (engine, _clock) = engine_with(Arc::new(RecordingMailer::default())).await;
    let alice = engine.register(alice()).await.unwrap();
    let as_alice = Actor::new(alice.id, Role::User);
    engine.add_expense(&as_alice, lunch(alice.id)).await.unwrap();

    engine.delete_user(alice.id, &as_alice).await.unwrap();
    assert!(matches!(
        engine.user(alice.id).await,
        Err(EngineError::KeyNotFound(_))
    ));

    // The username is free again.
    engine.register(self::alice()).await.unwrap();
}
