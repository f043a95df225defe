//! Fixtures shared by the service tests

use crate::storage::{NewSignalement, NewUser, Role, Signalement, Store, User};

use super::password::hash_password;

pub const PASSWORD: &str = "secret123";

pub fn user_with_role(store: &Store, email: &str, role: Role) -> User {
    store
        .insert_user(&NewUser {
            email: email.to_string(),
            password_hash: hash_password(PASSWORD).unwrap(),
            name: email.split('@').next().unwrap_or("user").to_string(),
            role,
            created_by: None,
        })
        .unwrap()
}

pub fn manager(store: &Store) -> User {
    user_with_role(store, "manager@voirie.mg", Role::Manager)
}

pub fn citizen(store: &Store, email: &str) -> User {
    user_with_role(store, email, Role::Utilisateur)
}

pub fn signalement(store: &Store, user_id: Option<i64>) -> Signalement {
    store
        .insert_signalement(
            &NewSignalement {
                user_id,
                latitude: -18.8792,
                longitude: 47.5079,
                adresse: Some("Avenue de l'Indépendance".to_string()),
                description: "Nid de poule profond".to_string(),
                ..Default::default()
            },
            None,
        )
        .unwrap()
}
