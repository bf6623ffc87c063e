//! Entity synchronizer
//!
//! Reconciles the desired users and authentication providers of an account
//! against what its admin API reports. Each pass lists the observed
//! entities, pairs them with the desired ones by identity key, plans the
//! remote operations per pair and executes them in order. The first failing
//! call aborts the pass; converged entities plan no operations on retry.

use std::collections::{BTreeMap, BTreeSet};

use tracing::{debug, info};

use crate::crd::{AuthProvider, SeedPolicy, User};
use crate::error::Result;
use crate::tenant_api::TenantService;

/// Entities paired by a natural identity key
pub trait Keyed {
    fn key(&self) -> &str;
}

impl Keyed for User {
    fn key(&self) -> &str {
        &self.username
    }
}

impl Keyed for AuthProvider {
    fn key(&self) -> &str {
        &self.name
    }
}

/// A desired entity and the observed entity with the same key, if any
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pair<T> {
    pub desired: T,
    pub observed: Option<T>,
}

/// Remote call planned for a user
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UserOperation {
    Create(User),
    Update { id: i64, user: User },
    UpdateRole { id: i64, role: String },
    Activate { id: i64 },
}

/// Remote call planned for an auth provider. Existing providers are never
/// updated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthProviderOperation {
    Create(AuthProvider),
}

/// Calls issued by one synchronization pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncSummary {
    pub users_created: usize,
    pub users_updated: usize,
    pub roles_changed: usize,
    pub users_activated: usize,
    pub auth_providers_created: usize,
}

impl SyncSummary {
    pub fn is_noop(&self) -> bool {
        *self == SyncSummary::default()
    }
}

/// Explicit users followed by the seeded users whose username is not taken.
///
/// Seeded users are indexed `1..=count`. The policy is expected to have its
/// defaults applied.
pub fn expand_seed_users(users: &[User], seed: &SeedPolicy) -> Vec<User> {
    let mut desired = users.to_vec();
    let mut taken: BTreeSet<String> = users.iter().map(|u| u.username.clone()).collect();
    for index in 1..=seed.count {
        let candidate = seed.user_for(index);
        if taken.insert(candidate.username.clone()) {
            desired.push(candidate);
        }
    }
    desired
}

/// Pair every desired entity with the observed entity of the same key.
///
/// Observed entities nobody asked for are left alone. Pairs come back in
/// key order.
pub fn pair_entities<T: Keyed + Clone>(desired: &[T], observed: Vec<T>) -> Vec<Pair<T>> {
    let mut observed: BTreeMap<String, T> = observed
        .into_iter()
        .map(|e| (e.key().to_string(), e))
        .collect();

    let desired: BTreeMap<&str, &T> = desired.iter().map(|e| (e.key(), e)).collect();

    desired
        .into_iter()
        .map(|(key, entity)| Pair {
            desired: entity.clone(),
            observed: observed.remove(key),
        })
        .collect()
}

/// Plan the calls that converge one user.
///
/// Only email and role are compared. The password never comes back from the
/// remote system, and id and state are remote-assigned. An empty desired
/// role means unspecified. Activation depends only on the observed state.
pub fn plan_user(pair: Pair<User>) -> Vec<UserOperation> {
    let Pair { desired, observed } = pair;
    let Some(observed) = observed else {
        return vec![UserOperation::Create(desired)];
    };

    let role_changed = !desired.role.is_empty() && desired.role != observed.role;
    let differs = desired.email != observed.email || role_changed;

    let mut operations = Vec::new();
    if differs {
        let mut update = desired.clone();
        update.id = observed.id;
        operations.push(UserOperation::Update {
            id: observed.id,
            user: update,
        });
        if role_changed {
            operations.push(UserOperation::UpdateRole {
                id: observed.id,
                role: desired.role.clone(),
            });
        }
    }

    if observed.is_pending() {
        operations.push(UserOperation::Activate { id: observed.id });
    }

    operations
}

pub fn plan_auth_provider(pair: Pair<AuthProvider>) -> Vec<AuthProviderOperation> {
    match pair.observed {
        None => vec![AuthProviderOperation::Create(pair.desired)],
        // TODO: add an update path once the admin API exposes one for providers
        Some(_) => Vec::new(),
    }
}

pub async fn sync_auth_providers(
    service: &dyn TenantService,
    desired: &[AuthProvider],
    summary: &mut SyncSummary,
) -> Result<()> {
    let observed = service.list_auth_providers().await?;
    for pair in pair_entities(desired, observed) {
        for operation in plan_auth_provider(pair) {
            match operation {
                AuthProviderOperation::Create(provider) => {
                    info!(provider = %provider.name, kind = %provider.kind, "Creating auth provider");
                    service.create_auth_provider(&provider).await?;
                    summary.auth_providers_created += 1;
                }
            }
        }
    }
    Ok(())
}

pub async fn sync_users(
    service: &dyn TenantService,
    users: &[User],
    seed: &SeedPolicy,
    summary: &mut SyncSummary,
) -> Result<()> {
    let desired = expand_seed_users(users, seed);
    let observed = service.list_users().await?;
    debug!(desired = desired.len(), observed = observed.len(), "Pairing users");

    for pair in pair_entities(&desired, observed) {
        let username = pair.desired.username.clone();
        for operation in plan_user(pair) {
            match operation {
                UserOperation::Create(user) => {
                    info!(username = %username, "Creating user");
                    service.create_user(&user).await?;
                    summary.users_created += 1;
                }
                UserOperation::Update { id, user } => {
                    info!(username = %username, id = id, "Updating user");
                    service.update_user(id, &user).await?;
                    summary.users_updated += 1;
                }
                UserOperation::UpdateRole { id, role } => {
                    info!(username = %username, id = id, role = %role, "Changing user role");
                    service.update_user_role(id, &role).await?;
                    summary.roles_changed += 1;
                }
                UserOperation::Activate { id } => {
                    info!(username = %username, id = id, "Activating user");
                    service.activate_user(id).await?;
                    summary.users_activated += 1;
                }
            }
        }
    }
    Ok(())
}

/// Auth providers first, then users.
pub async fn sync_entities(
    service: &dyn TenantService,
    users: &[User],
    seed: &SeedPolicy,
    auth_providers: &[AuthProvider],
) -> Result<SyncSummary> {
    let mut summary = SyncSummary::default();
    sync_auth_providers(service, auth_providers, &mut summary).await?;
    sync_users(service, users, seed, &mut summary).await?;
    Ok(summary)
}
