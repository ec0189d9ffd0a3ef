use serde::Deserialize;
use validator::Validate;

use crate::models::User;

/// Body of `POST /api/v1/users`. The user joins the caller's tenant.
#[derive(Debug, Deserialize, Validate)]
pub struct CreateUserRequest {
    #[validate(length(min = 1, max = 80, message = "Username is required"))]
    pub username: String,

    #[validate(length(min = 1, max = 254, message = "Name is required"))]
    pub name: String,

    #[validate(email(message = "Invalid email format"))]
    pub email: String,

    #[validate(length(min = 8, message = "Password must be at least 8 characters"))]
    pub password: String,

    #[validate(length(max = 70))]
    pub thumbnail: Option<String>,
}

/// Body of `PUT /api/v1/users/:id`. The password is kept when omitted.
#[derive(Debug, Deserialize, Validate)]
pub struct UpdateUserRequest {
    #[validate(length(min = 1, max = 80, message = "Username is required"))]
    pub username: String,

    #[validate(length(min = 1, max = 254, message = "Name is required"))]
    pub name: String,

    #[validate(email(message = "Invalid email format"))]
    pub email: String,

    #[validate(length(min = 8, message = "Password must be at least 8 characters"))]
    pub password: Option<String>,

    #[validate(length(max = 70))]
    pub thumbnail: Option<String>,
}

impl UpdateUserRequest {
    /// Copy every field but the password onto `user`; the password is returned
    /// for hashing.
    pub fn apply(self, user: &mut User) -> Option<String> {
        user.username = self.username;
        user.name = self.name;
        user.email = self.email;
        user.thumbnail = self.thumbnail;
        self.password
    }
}

/// Body of `PATCH /api/v1/users/:id`.
#[derive(Debug, Default, Deserialize, Validate)]
pub struct UserPatch {
    #[validate(length(min = 1, max = 80))]
    pub username: Option<String>,

    #[validate(length(min = 1, max = 254))]
    pub name: Option<String>,

    #[validate(email(message = "Invalid email format"))]
    pub email: Option<String>,

    #[validate(length(min = 8, message = "Password must be at least 8 characters"))]
    pub password: Option<String>,

    #[validate(length(max = 70))]
    pub thumbnail: Option<String>,
}

impl UserPatch {
    pub fn apply(self, user: &mut User) -> Option<String> {
        if let Some(username) = self.username {
            user.username = username;
        }
        if let Some(name) = self.name {
            user.name = name;
        }
        if let Some(email) = self.email {
            user.email = email;
        }
        if let Some(thumbnail) = self.thumbnail {
            user.thumbnail = Some(thumbnail);
        }
        self.password
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn user() -> User {
        User::new(Uuid::new_v4(), "ana", "Ana", "ana@acme.io", "digest".into())
    }

    #[test]
    fn short_passwords_fail_validation() {
        let req: CreateUserRequest = serde_json::from_value(serde_json::json!({
            "username": "ana", "name": "Ana", "email": "ana@acme.io", "password": "short"
        }))
        .unwrap();
        assert!(req.validate().is_err());
    }

    #[test]
    fn put_replaces_optional_fields_and_hands_back_the_password() {
        let mut target = user();
        target.thumbnail = Some("a.png".into());

        let req = UpdateUserRequest {
            username: "ana.s".into(),
            name: "Ana S".into(),
            email: "ana.s@acme.io".into(),
            password: None,
            thumbnail: None,
        };
        assert!(req.apply(&mut target).is_none());
        assert_eq!(target.username, "ana.s");
        assert!(target.thumbnail.is_none());
        assert_eq!(target.password_hash, "digest");
    }

    #[test]
    fn patch_touches_only_present_fields() {
        let mut target = user();
        let patch = UserPatch {
            name: Some("Ana Souza".into()),
            password: Some("new-password".into()),
            ..Default::default()
        };

        assert_eq!(patch.apply(&mut target).as_deref(), Some("new-password"));
        assert_eq!(target.name, "Ana Souza");
        assert_eq!(target.email, "ana@acme.io");
    }
}
