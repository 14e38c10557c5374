//! `depot whoami`

/// Report which auth tokens the release-hosting backends will use.
pub(crate) fn whoami() {
    for (name, var) in [("github", "GITHUB_TOKEN"), ("gitlab", "GITLAB_TOKEN")] {
        match std::env::var(var) {
            Ok(token) if !token.is_empty() => {
                println!("{name}: token detected ({var}, {} chars)", token.len());
            }
            _ => println!("{name}: no token ({var} unset)"),
        }
    }
}
