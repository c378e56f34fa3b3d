// src/policy/merge.rs

//! Merging of local and remote policies.
//!
//! The remote effective policy is authoritative: any local entry whose
//! identity the remote policy already defines is dropped. Everything else
//! from the local declaration is appended after the remote entries, keeping
//! the relative order of both sides.

use std::collections::HashSet;

use super::{EffectivePolicy, LOCAL_SOURCE, PolicyDocument, Sourced};

/// Combine the local declaration and the remote effective policy
pub fn merge(local: Option<PolicyDocument>, remote: Option<EffectivePolicy>) -> EffectivePolicy {
    let mut merged = remote.unwrap_or_default();
    let Some(local) = local else {
        return merged;
    };

    let remote_packages: HashSet<String> = merged
        .packages
        .iter()
        .map(|p| p.resource.name.clone())
        .collect();
    let remote_repositories: HashSet<String> = merged
        .repositories
        .iter()
        .filter_map(|r| r.resource.identity())
        .collect();
    let remote_recipes: HashSet<String> = merged
        .recipes
        .iter()
        .map(|r| r.resource.name.clone())
        .collect();

    merged.packages.extend(
        local
            .packages
            .into_iter()
            .filter(|p| !remote_packages.contains(&p.name))
            .map(|p| Sourced::new(LOCAL_SOURCE, p)),
    );

    merged.repositories.extend(
        local
            .repositories
            .into_iter()
            .filter(|r| match r.identity() {
                Some(id) => !remote_repositories.contains(&id),
                None => true,
            })
            .map(|r| Sourced::new(LOCAL_SOURCE, r)),
    );

    merged.recipes.extend(
        local
            .recipes
            .into_iter()
            .filter(|r| !remote_recipes.contains(&r.name))
            .map(|r| Sourced::new(LOCAL_SOURCE, r)),
    );

    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::{
        AptRepository, ArchiveType, DesiredState, GooRepository, Manager, PackageResource,
        RepositoryResource, RpmRepository,
    };
    use crate::recipe::SoftwareRecipe;

    fn pkg(name: &str, state: DesiredState) -> PackageResource {
        PackageResource::new(name, state, Manager::Any)
    }

    fn yum(id: &str, url: &str) -> RepositoryResource {
        RepositoryResource::Yum(RpmRepository {
            id: id.to_string(),
            display_name: None,
            base_url: url.to_string(),
            gpg_keys: vec![],
        })
    }

    fn apt(uri: &str) -> RepositoryResource {
        RepositoryResource::Apt(AptRepository {
            archive_type: ArchiveType::Deb,
            uri: uri.to_string(),
            distribution: "stable".to_string(),
            components: vec!["main".to_string()],
            gpg_key: None,
        })
    }

    fn recipe(name: &str, version: &str) -> SoftwareRecipe {
        SoftwareRecipe {
            name: name.to_string(),
            version: version.to_string(),
            ..Default::default()
        }
    }

    fn remote_policy() -> EffectivePolicy {
        EffectivePolicy {
            packages: vec![
                Sourced::new("org", pkg("nginx", DesiredState::Updated)),
                Sourced::new("org", pkg("telnet", DesiredState::Removed)),
            ],
            repositories: vec![
                Sourced::new("org", yum("epel", "https://remote/epel")),
                Sourced::new("org", apt("http://remote/debian")),
            ],
            recipes: vec![Sourced::new("org", recipe("agent", "2.0"))],
        }
    }

    #[test]
    fn test_both_absent_is_empty() {
        assert!(merge(None, None).is_empty());
    }

    #[test]
    fn test_empty_local_returns_remote() {
        let remote = remote_policy();
        assert_eq!(merge(None, Some(remote.clone())), remote);
        assert_eq!(merge(Some(PolicyDocument::default()), Some(remote.clone())), remote);
    }

    #[test]
    fn test_local_only_is_tagged_local() {
        let local = PolicyDocument {
            packages: vec![pkg("vim", DesiredState::Installed)],
            ..Default::default()
        };
        let merged = merge(Some(local), None);
        assert_eq!(merged.packages.len(), 1);
        assert_eq!(merged.packages[0].source, LOCAL_SOURCE);
    }

    #[test]
    fn test_remote_wins_conflicts() {
        let local = PolicyDocument {
            packages: vec![
                pkg("nginx", DesiredState::Removed),
                pkg("vim", DesiredState::Installed),
            ],
            repositories: vec![
                yum("epel", "https://local/epel"),
                yum("internal", "https://local/internal"),
                apt("http://local/debian"),
            ],
            recipes: vec![recipe("agent", "1.0"), recipe("tools", "1.0")],
        };

        let remote = remote_policy();
        let merged = merge(Some(local), Some(remote.clone()));

        // Remote entries come first and unchanged
        assert_eq!(&merged.packages[..2], &remote.packages[..]);
        assert_eq!(&merged.repositories[..2], &remote.repositories[..]);
        assert_eq!(&merged.recipes[..1], &remote.recipes[..]);

        let names: Vec<&str> = merged.packages.iter().map(|p| p.resource.name.as_str()).collect();
        assert_eq!(names, vec!["nginx", "telnet", "vim"]);

        // epel overridden, internal appended, apt always appended
        assert_eq!(merged.repositories.len(), 4);
        assert_eq!(merged.repositories[2].resource, yum("internal", "https://local/internal"));
        assert_eq!(merged.repositories[3].resource, apt("http://local/debian"));

        let recipes: Vec<&str> = merged.recipes.iter().map(|r| r.resource.name.as_str()).collect();
        assert_eq!(recipes, vec!["agent", "tools"]);
    }

    #[test]
    fn test_apt_and_goo_never_deduplicated() {
        let goo = RepositoryResource::Goo(GooRepository {
            name: "corp".to_string(),
            url: "https://goo".to_string(),
        });
        let remote = EffectivePolicy {
            repositories: vec![
                Sourced::new("org", apt("http://same")),
                Sourced::new("org", goo.clone()),
            ],
            ..Default::default()
        };
        let local = PolicyDocument {
            repositories: vec![apt("http://same"), goo],
            ..Default::default()
        };

        let merged = merge(Some(local), Some(remote));
        assert_eq!(merged.repositories.len(), 4);
    }

    #[test]
    fn test_yum_and_zypper_ids_are_distinct() {
        let remote = EffectivePolicy {
            repositories: vec![Sourced::new("org", yum("shared", "https://remote"))],
            ..Default::default()
        };
        let zypper = RepositoryResource::Zypper(RpmRepository {
            id: "shared".to_string(),
            display_name: None,
            base_url: "https://local".to_string(),
            gpg_keys: vec![],
        });
        let local = PolicyDocument {
            repositories: vec![zypper.clone()],
            ..Default::default()
        };

        let merged = merge(Some(local), Some(remote));
        assert_eq!(merged.repositories.len(), 2);
        assert_eq!(merged.repositories[1].resource, zypper);
    }

    #[test]
    fn test_merge_preserves_local_order() {
        let local = PolicyDocument {
            packages: vec![
                pkg("zsh", DesiredState::Installed),
                pkg("nginx", DesiredState::Installed),
                pkg("bash", DesiredState::Installed),
                pkg("awk", DesiredState::Installed),
            ],
            ..Default::default()
        };
        let merged = merge(Some(local), Some(remote_policy()));
        let names: Vec<&str> = merged.packages.iter().map(|p| p.resource.name.as_str()).collect();
        assert_eq!(names, vec!["nginx", "telnet", "zsh", "bash", "awk"]);
    }
}
