use async_trait::async_trait;
use sqlx::{PgPool, Postgres, QueryBuilder};
use tracing::debug;

use crate::users::repo_types::{NewUser, User};

const USER_COLUMNS: &str = "id, name, email, password_hash, bio, avatar";

/// Column predicate used by lookups and deletes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Filter {
    Id(i32),
    Name(String),
    Email(String),
    And(Box<Filter>, Box<Filter>),
    Or(Box<Filter>, Box<Filter>),
}

impl Filter {
    pub fn id(id: i32) -> Self {
        Self::Id(id)
    }

    pub fn name(name: impl Into<String>) -> Self {
        Self::Name(name.into())
    }

    pub fn email(email: impl Into<String>) -> Self {
        Self::Email(email.into())
    }

    pub fn and(self, other: Filter) -> Self {
        Self::And(Box::new(self), Box::new(other))
    }

    pub fn or(self, other: Filter) -> Self {
        Self::Or(Box::new(self), Box::new(other))
    }

    pub fn matches(&self, user: &User) -> bool {
        match self {
            Self::Id(id) => user.id == *id,
            Self::Name(name) => user.name == *name,
            Self::Email(email) => user.email == *email,
            Self::And(a, b) => a.matches(user) && b.matches(user),
            Self::Or(a, b) => a.matches(user) || b.matches(user),
        }
    }

    /// Appends the predicate as SQL with bound parameters.
    pub fn push_sql(&self, qb: &mut QueryBuilder<'_, Postgres>) {
        match self {
            Self::Id(id) => {
                qb.push("id = ").push_bind(*id);
            }
            Self::Name(name) => {
                qb.push("name = ").push_bind(name.clone());
            }
            Self::Email(email) => {
                qb.push("email = ").push_bind(email.clone());
            }
            Self::And(a, b) => Self::push_pair(qb, a, " AND ", b),
            Self::Or(a, b) => Self::push_pair(qb, a, " OR ", b),
        }
    }

    fn push_pair(qb: &mut QueryBuilder<'_, Postgres>, a: &Filter, op: &str, b: &Filter) {
        qb.push("(");
        a.push_sql(qb);
        qb.push(op);
        b.push_sql(qb);
        qb.push(")");
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("unique constraint violated: {0}")]
    UniqueViolation(String),
    #[error("row not found")]
    NotFound,
    #[error(transparent)]
    Database(sqlx::Error),
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => Self::NotFound,
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                Self::UniqueViolation(db.constraint().unwrap_or("users").to_string())
            }
            other => Self::Database(other),
        }
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Persistence port for user rows.
#[async_trait]
pub trait UserStore: Send + Sync {
    async fn find_all(&self) -> StoreResult<Vec<User>>;
    async fn find_one(&self, filter: &Filter) -> StoreResult<Option<User>>;
    async fn find_by_id(&self, id: i32) -> StoreResult<Option<User>>;
    async fn insert(&self, user: NewUser) -> StoreResult<User>;
    /// Writes every mutable column of `user`, keyed by its id.
    async fn save(&self, user: &User) -> StoreResult<User>;
    /// Returns the number of deleted rows.
    async fn delete(&self, filter: &Filter) -> StoreResult<u64>;
}

#[derive(Clone)]
pub struct PgUserStore {
    db: PgPool,
}

impl PgUserStore {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

#[async_trait]
impl UserStore for PgUserStore {
    async fn find_all(&self) -> StoreResult<Vec<User>> {
        let users = sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users ORDER BY id"
        ))
        .fetch_all(&self.db)
        .await?;
        Ok(users)
    }

    async fn find_one(&self, filter: &Filter) -> StoreResult<Option<User>> {
        let mut qb = QueryBuilder::<Postgres>::new(format!("SELECT {USER_COLUMNS} FROM users WHERE "));
        filter.push_sql(&mut qb);
        qb.push(" ORDER BY id LIMIT 1");
        debug!(sql = qb.sql(), "find_one");
        let user = qb.build_query_as::<User>().fetch_optional(&self.db).await?;
        Ok(user)
    }

    async fn find_by_id(&self, id: i32) -> StoreResult<Option<User>> {
        let user = sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.db)
        .await?;
        Ok(user)
    }

    async fn insert(&self, user: NewUser) -> StoreResult<User> {
        let user = sqlx::query_as::<_, User>(&format!(
            r#"
            INSERT INTO users (name, email, password_hash, bio, avatar)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING {USER_COLUMNS}
            "#
        ))
        .bind(user.name)
        .bind(user.email)
        .bind(user.password_hash)
        .bind(user.bio)
        .bind(user.avatar)
        .fetch_one(&self.db)
        .await?;
        Ok(user)
    }

    async fn save(&self, user: &User) -> StoreResult<User> {
        let saved = sqlx::query_as::<_, User>(&format!(
            r#"
            UPDATE users
               SET name = $2, email = $3, password_hash = $4, bio = $5, avatar = $6
             WHERE id = $1
            RETURNING {USER_COLUMNS}
            "#
        ))
        .bind(user.id)
        .bind(&user.name)
        .bind(&user.email)
        .bind(&user.password_hash)
        .bind(&user.bio)
        .bind(&user.avatar)
        .fetch_one(&self.db)
        .await?;
        Ok(saved)
    }

    async fn delete(&self, filter: &Filter) -> StoreResult<u64> {
        let mut qb = QueryBuilder::<Postgres>::new("DELETE FROM users WHERE ");
        filter.push_sql(&mut qb);
        let res = qb.build().execute(&self.db).await?;
        Ok(res.rows_affected())
    }
}
