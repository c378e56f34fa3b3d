// src/repository/format.rs

//! Native repository file formats
//!
//! Every managed file starts with [`HEADER`]. With no repositories the file
//! is just the header, which is how repositories dropped from the policy are
//! removed from the host.

use crate::policy::{AptRepository, GooRepository, Manager, RepositoryResource, RpmRepository};

/// First line of every managed repository file
pub const HEADER: &str = "# Repo file managed by converge";

/// Render the repository file for `manager` from the policy's repositories
///
/// Repositories for other managers are ignored.
pub fn render(manager: Manager, repos: &[&RepositoryResource]) -> String {
    match manager {
        Manager::Apt => render_apt(repos.iter().filter_map(|r| match r {
            RepositoryResource::Apt(apt) => Some(apt),
            _ => None,
        })),
        Manager::Yum => render_rpm(repos.iter().filter_map(|r| match r {
            RepositoryResource::Yum(yum) => Some(yum),
            _ => None,
        })),
        Manager::Zypper => render_rpm(repos.iter().filter_map(|r| match r {
            RepositoryResource::Zypper(zypper) => Some(zypper),
            _ => None,
        })),
        Manager::Goo => render_goo(repos.iter().filter_map(|r| match r {
            RepositoryResource::Goo(goo) => Some(goo),
            _ => None,
        })),
        Manager::Any => format!("{HEADER}\n"),
    }
}

/// `deb http://deb.example.com stable main contrib`
pub fn render_apt<'a>(repos: impl IntoIterator<Item = &'a AptRepository>) -> String {
    let mut out = format!("{HEADER}\n");
    for repo in repos {
        let mut line = format!("\n{} {} {}", repo.archive_type.as_str(), repo.uri, repo.distribution);
        for component in &repo.components {
            line.push(' ');
            line.push_str(component);
        }
        out.push_str(&line);
    }
    if out.ends_with(|c| c != '\n') {
        out.push('\n');
    }
    out
}

/// INI-style sections shared by yum and zypper
pub fn render_rpm<'a>(repos: impl IntoIterator<Item = &'a RpmRepository>) -> String {
    const GPGKEY: &str = "gpgkey=";

    let mut out = format!("{HEADER}\n");
    for repo in repos {
        let name = repo
            .display_name
            .as_deref()
            .filter(|n| !n.is_empty())
            .unwrap_or(&repo.id);
        out.push_str(&format!("\n[{}]\n", repo.id));
        out.push_str(&format!("name={}\n", name));
        out.push_str(&format!("baseurl={}\n", repo.base_url));
        out.push_str("enabled=1\ngpgcheck=1\nrepo_gpgcheck=1\n");
        for (i, key) in repo.gpg_keys.iter().enumerate() {
            if i == 0 {
                out.push_str(&format!("{GPGKEY}{key}\n"));
            } else {
                out.push_str(&format!("{:width$}{key}\n", "", width = GPGKEY.len()));
            }
        }
    }
    out
}

/// YAML list consumed by googet
pub fn render_goo<'a>(repos: impl IntoIterator<Item = &'a GooRepository>) -> String {
    let mut out = format!("{HEADER}\n");
    for repo in repos {
        out.push_str(&format!("\n- name: {}\n  url: {}\n", repo.name, repo.url));
    }
    out
}
