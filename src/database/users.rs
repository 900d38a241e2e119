use anyhow::Result;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::{fmt, str::FromStr};
use uuid::Uuid;

use super::DbPool;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    #[default]
    User,
    Junior,
    Senior,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Junior => "junior",
            Role::Senior => "senior",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "user" => Ok(Role::User),
            "junior" => Ok(Role::Junior),
            "senior" => Ok(Role::Senior),
            other => Err(anyhow::anyhow!("Unknown role '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, FromRow)]
struct UserRow {
    id: String,
    email: String,
    password_hash: String,
    role: String,
    skills: String,
    experience: i64,
    created_at: String,
}

/// A registered account. The password hash never leaves the server.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: String,
    pub email: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub role: Role,
    pub skills: Vec<String>,
    pub experience: i64,
    pub created_at: String,
}

impl TryFrom<UserRow> for User {
    type Error = anyhow::Error;

    fn try_from(row: UserRow) -> Result<Self> {
        Ok(User {
            id: row.id,
            email: row.email,
            password_hash: row.password_hash,
            role: row.role.parse()?,
            skills: serde_json::from_str(&row.skills)?,
            experience: row.experience,
            created_at: row.created_at,
        })
    }
}

#[derive(Debug, Clone)]
pub struct CreateUserRequest {
    pub email: String,
    pub password_hash: String,
    pub role: Role,
    pub skills: Vec<String>,
}

/// Lowercase, trim and drop empty entries.
pub fn normalize_skills<I, S>(skills: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    skills
        .into_iter()
        .map(|s| s.as_ref().trim().to_lowercase())
        .filter(|s| !s.is_empty())
        .collect()
}

const USER_COLUMNS: &str = "id, email, password_hash, role, skills, experience, created_at";

impl User {
    pub async fn create(pool: &DbPool, req: CreateUserRequest) -> Result<User> {
        let skills_json = serde_json::to_string(&normalize_skills(&req.skills))?;

        let row = sqlx::query_as::<_, UserRow>(&format!(
            r#"
            INSERT INTO users (id, email, password_hash, role, skills)
            VALUES (?1, ?2, ?3, ?4, ?5)
            RETURNING {USER_COLUMNS}
        "#
        ))
        .bind(Uuid::new_v4().to_string())
        .bind(req.email.trim().to_lowercase())
        .bind(&req.password_hash)
        .bind(req.role.as_str())
        .bind(&skills_json)
        .fetch_one(pool)
        .await?;

        row.try_into()
    }

    pub async fn get_by_id(pool: &DbPool, id: &str) -> Result<Option<User>> {
        sqlx::query_as::<_, UserRow>(&format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?1"))
            .bind(id)
            .fetch_optional(pool)
            .await?
            .map(User::try_from)
            .transpose()
    }

    pub async fn get_by_email(pool: &DbPool, email: &str) -> Result<Option<User>> {
        sqlx::query_as::<_, UserRow>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE email = ?1"
        ))
        .bind(email.trim().to_lowercase())
        .fetch_optional(pool)
        .await?
        .map(User::try_from)
        .transpose()
    }

    pub async fn email_exists(pool: &DbPool, email: &str) -> Result<bool> {
        let exists = sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS(SELECT 1 FROM users WHERE email = ?1)",
        )
        .bind(email.trim().to_lowercase())
        .fetch_one(pool)
        .await?;
        Ok(exists)
    }

    /// Juniors ordered by experience (highest first), then by email
    pub async fn list_juniors(pool: &DbPool) -> Result<Vec<User>> {
        sqlx::query_as::<_, UserRow>(&format!(
            r#"
            SELECT {USER_COLUMNS}
            FROM users
            WHERE role = 'junior'
            ORDER BY experience DESC, email ASC
        "#
        ))
        .fetch_all(pool)
        .await?
        .into_iter()
        .map(User::try_from)
        .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_round_trips_through_str() {
        for role in [Role::User, Role::Junior, Role::Senior] {
            assert_eq!(role.as_str().parse::<Role>().unwrap(), role);
        }
        assert!("admin".parse::<Role>().is_err());
    }

    #[test]
    fn normalize_skills_lowercases_and_drops_blanks() {
        assert_eq!(
            normalize_skills(["  React ", "", "NODE", "   "]),
            vec!["react", "node"]
        );
    }

    #[test]
    fn password_hash_is_not_serialized() {
        let user = User {
            id: "u1".to_string(),
            email: "a@b.c".to_string(),
            password_hash: "secret-hash".to_string(),
            role: Role::Junior,
            skills: vec!["css".to_string()],
            experience: 2,
            created_at: "now".to_string(),
        };
        let json = serde_json::to_value(&user).unwrap();
        assert!(json.get("passwordHash").is_none());
        assert_eq!(json["role"], "junior");
        assert_eq!(json["experience"], 2);
    }
}
