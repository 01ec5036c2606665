use std::{collections::BTreeMap, sync::Arc};

use axum::extract::FromRef;
use lazy_static::lazy_static;
use regex::Regex;
use tracing::{info, instrument, warn};

use crate::{
    auth::{
        jwt::JwtKeys,
        password::{hash_password, verify_password},
    },
    config::PasswordScheme,
    error::ApiError,
    state::AppState,
    users::{
        dto::{CreateUserDto, DeleteResult, LoginUserDto, UpdateUserDto, UserResponse, UserView},
        repo::{Filter, UserStore},
        repo_types::{NewUser, User},
    },
};

pub(crate) fn is_valid_email(email: &str) -> bool {
    lazy_static! {
        static ref EMAIL_RE: Regex =
            Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").expect("email regex compiles");
    }
    EMAIL_RE.is_match(email)
}

pub(crate) fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// User operations over an injected store.
#[derive(Clone)]
pub struct UserService {
    store: Arc<dyn UserStore>,
    keys: JwtKeys,
    scheme: PasswordScheme,
}

impl FromRef<AppState> for UserService {
    fn from_ref(state: &AppState) -> Self {
        Self::new(
            state.store.clone(),
            JwtKeys::from_ref(state),
            state.config.password_scheme,
        )
    }
}

impl UserService {
    pub fn new(store: Arc<dyn UserStore>, keys: JwtKeys, scheme: PasswordScheme) -> Self {
        Self {
            store,
            keys,
            scheme,
        }
    }

    pub async fn find_all(&self) -> Result<Vec<User>, ApiError> {
        Ok(self.store.find_all().await?)
    }

    /// Credential lookup. Unknown email and wrong password both give `None`.
    #[instrument(skip(self, dto))]
    pub async fn find_one(&self, dto: LoginUserDto) -> Result<Option<User>, ApiError> {
        let email = normalize_email(&dto.email);
        let Some(user) = self.store.find_one(&Filter::email(&email)).await? else {
            return Ok(None);
        };
        if verify_password(&dto.password, &user.password_hash)? {
            Ok(Some(user))
        } else {
            warn!(user_id = user.id, "password mismatch");
            Ok(None)
        }
    }

    #[instrument(skip(self, dto))]
    pub async fn create(&self, dto: CreateUserDto) -> Result<UserResponse, ApiError> {
        let name = dto.name.trim().to_string();
        let email = normalize_email(&dto.email);

        let existing = self
            .store
            .find_one(&Filter::name(&name).or(Filter::email(&email)))
            .await?;
        if existing.is_some() {
            warn!(%email, "name or email already taken");
            return Err(ApiError::not_unique());
        }

        let mut errors = BTreeMap::new();
        if name.is_empty() {
            errors.insert("name".to_string(), "name must not be empty".to_string());
        }
        if !is_valid_email(&email) {
            errors.insert("email".to_string(), "email is not valid".to_string());
        }
        if dto.password.is_empty() {
            errors.insert("password".to_string(), "password must not be empty".to_string());
        }
        if !errors.is_empty() {
            warn!(fields = ?errors.keys().collect::<Vec<_>>(), "invalid user input");
            return Err(ApiError::Validation { errors });
        }

        let password_hash = hash_password(&dto.password, self.scheme)?;
        // The lookup above and this insert are not atomic; a concurrent create
        // that wins the race trips the unique index and maps to the same error.
        let user = self
            .store
            .insert(NewUser {
                name,
                email,
                password_hash,
                bio: None,
                avatar: None,
            })
            .await?;

        info!(user_id = user.id, email = %user.email, "user created");
        self.build_user_ro(&user)
    }

    /// Merges `dto` over the stored row. A supplied password is hashed.
    #[instrument(skip(self, dto))]
    pub async fn update(&self, id: i32, dto: UpdateUserDto) -> Result<User, ApiError> {
        let mut user = self
            .store
            .find_by_id(id)
            .await?
            .ok_or(ApiError::UserNotFound)?;

        if let Some(name) = dto.name {
            let name = name.trim().to_string();
            if name.is_empty() {
                return Err(ApiError::validation("name", "name must not be empty"));
            }
            user.name = name;
        }
        if let Some(email) = dto.email {
            let email = normalize_email(&email);
            if !is_valid_email(&email) {
                return Err(ApiError::validation("email", "email is not valid"));
            }
            user.email = email;
        }
        if let Some(password) = dto.password {
            if password.is_empty() {
                return Err(ApiError::validation("password", "password must not be empty"));
            }
            user.password_hash = hash_password(&password, self.scheme)?;
        }
        if let Some(bio) = dto.bio {
            user.bio = bio;
        }
        if let Some(avatar) = dto.avatar {
            user.avatar = avatar;
        }

        let saved = self.store.save(&user).await?;
        info!(user_id = saved.id, "user updated");
        Ok(saved)
    }

    #[instrument(skip(self))]
    pub async fn delete(&self, email: &str) -> Result<DeleteResult, ApiError> {
        let affected = self
            .store
            .delete(&Filter::email(normalize_email(email)))
            .await?;
        info!(affected, "users deleted");
        Ok(DeleteResult { affected })
    }

    #[instrument(skip(self))]
    pub async fn find_by_id(&self, id: i32) -> Result<UserResponse, ApiError> {
        let user = self
            .store
            .find_by_id(id)
            .await?
            .ok_or(ApiError::UserNotFound)?;
        self.build_user_ro(&user)
    }

    #[instrument(skip(self))]
    pub async fn find_by_email(&self, email: &str) -> Result<UserResponse, ApiError> {
        let user = self
            .store
            .find_one(&Filter::email(normalize_email(email)))
            .await?
            .ok_or(ApiError::UserNotFound)?;
        self.build_user_ro(&user)
    }

    pub fn generate_jwt(&self, user: &User) -> Result<String, ApiError> {
        Ok(self.keys.sign(user)?)
    }

    /// Shapes the public view. Every call issues a fresh token.
    pub fn build_user_ro(&self, user: &User) -> Result<UserResponse, ApiError> {
        Ok(UserResponse {
            user: UserView {
                name: user.name.clone(),
                email: user.email.clone(),
                bio: user.bio.clone(),
                token: self.generate_jwt(user)?,
                avatar: user.avatar.clone(),
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{config::JwtConfig, users::memory::MemoryUserStore};

    fn keys() -> JwtKeys {
        JwtKeys::from_config(&JwtConfig {
            secret: "test".into(),
            ttl_days: 60,
        })
    }

    fn service_with(scheme: PasswordScheme) -> (UserService, Arc<MemoryUserStore>) {
        let store = Arc::new(MemoryUserStore::new());
        let svc = UserService::new(store.clone(), keys(), scheme);
        (svc, store)
    }

    fn service() -> (UserService, Arc<MemoryUserStore>) {
        service_with(PasswordScheme::Argon2)
    }

    fn alice() -> CreateUserDto {
        CreateUserDto {
            name: "alice".into(),
            email: "a@x.com".into(),
            password: "secret".into(),
        }
    }

    fn login(email: &str, password: &str) -> LoginUserDto {
        LoginUserDto {
            email: email.into(),
            password: password.into(),
        }
    }

    fn assert_not_unique(err: ApiError) {
        match err {
            ApiError::Validation { errors } => {
                assert_eq!(errors.get("username").map(String::as_str), Some(crate::error::UNIQUE_MESSAGE))
            }
            other => panic!("expected uniqueness conflict, got {other:?}"),
        }
    }

    #[test]
    fn email_validation() {
        assert!(is_valid_email("a@x.com"));
        assert!(!is_valid_email("a@x"));
        assert!(!is_valid_email("no at sign.com"));
        assert!(!is_valid_email(""));
    }

    #[tokio::test]
    async fn create_then_duplicate_then_login() {
        let (svc, store) = service();

        let created = svc.create(alice()).await.expect("create");
        assert_eq!(created.user.email, "a@x.com");
        assert_eq!(created.user.name, "alice");
        let claims = keys().verify(&created.user.token).expect("token valid");
        assert_eq!(claims.email, "a@x.com");
        assert_eq!(claims.id, 1);
        assert_eq!(store.len().await, 1);

        assert_not_unique(svc.create(alice()).await.unwrap_err());
        assert_eq!(store.len().await, 1);

        let found = svc.find_one(login("a@x.com", "secret")).await.unwrap();
        assert_eq!(found.map(|u| u.email), Some("a@x.com".to_string()));
        assert!(svc.find_one(login("a@x.com", "wrong")).await.unwrap().is_none());
        assert!(svc.find_one(login("b@x.com", "secret")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn create_conflicts_on_either_field() {
        let (svc, _) = service();
        svc.create(alice()).await.unwrap();

        let same_name = CreateUserDto {
            email: "other@x.com".into(),
            ..alice()
        };
        assert_not_unique(svc.create(same_name).await.unwrap_err());

        let same_email = CreateUserDto {
            name: "bob".into(),
            ..alice()
        };
        assert_not_unique(svc.create(same_email).await.unwrap_err());
    }

    #[tokio::test]
    async fn create_never_stores_plaintext() {
        let (svc, store) = service_with(PasswordScheme::LegacyHmac);
        svc.create(alice()).await.unwrap();
        let row = store.find_by_id(1).await.unwrap().unwrap();
        assert_ne!(row.password_hash, "secret");
        assert_eq!(
            row.password_hash,
            crate::auth::password::legacy_hmac_hex("secret").unwrap()
        );
        assert!(svc.find_one(login("a@x.com", "secret")).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn create_rejects_invalid_fields() {
        let (svc, store) = service();
        let err = svc
            .create(CreateUserDto {
                name: "  ".into(),
                email: "not-an-email".into(),
                password: String::new(),
            })
            .await
            .unwrap_err();
        match err {
            ApiError::Validation { errors } => {
                assert!(errors.contains_key("name"));
                assert!(errors.contains_key("email"));
                assert!(errors.contains_key("password"));
            }
            other => panic!("expected validation error, got {other:?}"),
        }
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn find_by_id_missing_and_present() {
        let (svc, _) = service();
        assert!(matches!(svc.find_by_id(99).await, Err(ApiError::UserNotFound)));

        svc.create(alice()).await.unwrap();
        svc.update(
            1,
            UpdateUserDto {
                bio: Some(Some("hello".into())),
                ..Default::default()
            },
        )
        .await
        .unwrap();

        let view = svc.find_by_id(1).await.unwrap();
        assert_eq!(view.user.email, "a@x.com");
        assert_eq!(view.user.bio.as_deref(), Some("hello"));
    }

    #[tokio::test]
    async fn find_by_email_missing_is_not_found() {
        let (svc, _) = service();
        assert!(matches!(
            svc.find_by_email("ghost@x.com").await,
            Err(ApiError::UserNotFound)
        ));
    }

    #[tokio::test]
    async fn every_view_carries_a_valid_token() {
        let (svc, _) = service();
        svc.create(alice()).await.unwrap();
        let view = svc.find_by_email("A@X.com").await.unwrap();
        let claims = keys().verify(&view.user.token).unwrap();
        assert_eq!(claims.id, 1);
        assert_eq!(claims.username, "alice");
    }

    #[tokio::test]
    async fn update_keeps_password_unless_supplied() {
        let (svc, store) = service();
        svc.create(alice()).await.unwrap();
        let before = store.find_by_id(1).await.unwrap().unwrap().password_hash;

        let updated = svc
            .update(
                1,
                UpdateUserDto {
                    avatar: Some(Some("https://img/a.png".into())),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.avatar.as_deref(), Some("https://img/a.png"));
        assert_eq!(updated.password_hash, before);

        svc.update(
            1,
            UpdateUserDto {
                password: Some("n3w".into()),
                ..Default::default()
            },
        )
        .await
        .unwrap();
        let row = store.find_by_id(1).await.unwrap().unwrap();
        assert_ne!(row.password_hash, "n3w");
        assert!(svc.find_one(login("a@x.com", "n3w")).await.unwrap().is_some());
        assert!(svc.find_one(login("a@x.com", "secret")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn update_missing_user_is_not_found() {
        let (svc, _) = service();
        let err = svc.update(5, UpdateUserDto::default()).await.unwrap_err();
        assert!(matches!(err, ApiError::UserNotFound));
    }

    #[tokio::test]
    async fn update_into_taken_email_conflicts() {
        let (svc, _) = service();
        svc.create(alice()).await.unwrap();
        svc.create(CreateUserDto {
            name: "bob".into(),
            email: "b@x.com".into(),
            password: "pw".into(),
        })
        .await
        .unwrap();

        let err = svc
            .update(
                2,
                UpdateUserDto {
                    email: Some("a@x.com".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap_err();
        assert_not_unique(err);
    }

    #[tokio::test]
    async fn delete_counts_matches() {
        let (svc, store) = service();
        assert_eq!(svc.delete("a@x.com").await.unwrap(), DeleteResult { affected: 0 });

        svc.create(alice()).await.unwrap();
        svc.create(CreateUserDto {
            name: "bob".into(),
            email: "b@x.com".into(),
            password: "pw".into(),
        })
        .await
        .unwrap();

        assert_eq!(svc.delete("a@x.com").await.unwrap(), DeleteResult { affected: 1 });
        assert_eq!(store.len().await, 1);
        assert_eq!(svc.find_all().await.unwrap()[0].name, "bob");
    }
    #[tokio::test]
    async fn update_with_null_clears_bio() {
        let (svc, _) = service();
        svc.create(alice()).await.unwrap();
        svc.update(
            1,
            UpdateUserDto {
                bio: Some(Some("hello".into())),
                avatar: Some(Some("https://img/a.png".into())),
                ..Default::default()
            },
        )
        .await
        .unwrap();

        let cleared = svc
            .update(
                1,
                UpdateUserDto {
                    bio: Some(None),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(cleared.bio, None);
        assert_eq!(cleared.avatar.as_deref(), Some("https://img/a.png"));
    }

    /// Store whose lookups never see a match, as when a concurrent create
    /// commits between the existence check and the insert.
    struct RacingStore {
        inner: MemoryUserStore,
    }

    #[async_trait::async_trait]
    impl UserStore for RacingStore {
        async fn find_all(&self) -> crate::users::repo::StoreResult<Vec<User>> {
            self.inner.find_all().await
        }
        async fn find_one(&self, _filter: &Filter) -> crate::users::repo::StoreResult<Option<User>> {
            Ok(None)
        }
        async fn find_by_id(&self, id: i32) -> crate::users::repo::StoreResult<Option<User>> {
            self.inner.find_by_id(id).await
        }
        async fn insert(&self, user: NewUser) -> crate::users::repo::StoreResult<User> {
            self.inner.insert(user).await
        }
        async fn save(&self, user: &User) -> crate::users::repo::StoreResult<User> {
            self.inner.save(user).await
        }
        async fn delete(&self, filter: &Filter) -> crate::users::repo::StoreResult<u64> {
            self.inner.delete(filter).await
        }
    }

    #[tokio::test]
    async fn insert_conflict_after_clean_check_is_uniqueness_error() {
        let store = Arc::new(RacingStore {
            inner: MemoryUserStore::new(),
        });
        let svc = UserService::new(store.clone(), keys(), PasswordScheme::Argon2);

        svc.create(alice()).await.expect("first create");
        assert_not_unique(svc.create(alice()).await.unwrap_err());
        assert_eq!(store.inner.len().await, 1);
    }
}
