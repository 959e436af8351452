//! Execution engine for provisor
//!
//! The engine orchestrates:
//! 1. Planning - Build the run list from the configuration
//! 2. Executing - Converge it through `declarative`, with console progress
//! 3. Reporting - Summaries, plan previews and the JSON run log

pub mod differ;
pub mod executor;
pub mod planner;

pub use executor::{ConsoleProgress, TimedReport, print_summary, run};
pub use planner::{Overrides, Providers, build_run_list, execute_options};

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::user::tests::FakeAccounts;
    use crate::schema::Config;
    use declarative::{DeclarationState, ExecuteSummary, SystemProbe};
    use std::fs;
    use std::path::Path;
    use std::sync::Arc;

    fn write_config(root: &Path, port: u16) -> Config {
        fs::create_dir_all(root.join("templates")).unwrap();
        fs::write(
            root.join("templates/app.conf.tmpl"),
            "listen = {{ port }}\nhome = {{ home }}\n",
        )
        .unwrap();

        let home = root.join("home/app");
        let source = format!(
            r#"
[vars]
port = {port}
home = "{home}"

[[resource]]
kind = "user"
name = "app"
home = "{home}"
manage_home = true

[[resource]]
kind = "directory"
path = "{root}/etc/app"
mode = "0755"
recursive = true

[[resource]]
kind = "file"
path = "{root}/etc/app/app.conf"
template = "app.conf.tmpl"
mode = "0640"
"#,
            home = home.display(),
            root = root.display(),
        );
        let path = root.join("provisor.toml");
        fs::write(&path, source).unwrap();
        Config::load(&path).unwrap()
    }

    fn converge(config: &Config, accounts: &Arc<FakeAccounts>) -> TimedReport {
        let providers = planner::tests::fake_providers(Arc::clone(accounts));
        let opts = execute_options(&config.settings, &Overrides::default());
        let run_list = build_run_list(config, &providers, &opts).unwrap();
        run(&run_list, &opts, &SystemProbe, &mut ConsoleProgress::quiet())
    }

    #[test]
    fn test_converges_then_stays_converged() {
        let dir = tempfile::tempdir().unwrap();
        let accounts = Arc::new(FakeAccounts::default());
        let config = write_config(dir.path(), 8080);

        let first = converge(&config, &accounts);
        assert!(first.report.is_success(), "{:?}", first.report.failures);
        assert_eq!(first.report.summary.changed, 3);
        assert!(dir.path().join("home/app").is_dir());
        assert_eq!(
            fs::read_to_string(dir.path().join("etc/app/app.conf")).unwrap(),
            format!("listen = 8080\nhome = {}\n", dir.path().join("home/app").display())
        );

        let second = converge(&config, &accounts);
        assert_eq!(
            second.report.summary,
            ExecuteSummary {
                unchanged: 3,
                ..ExecuteSummary::default()
            }
        );
        assert_eq!(accounts.calls.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_changed_variable_touches_only_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let accounts = Arc::new(FakeAccounts::default());
        converge(&write_config(dir.path(), 8080), &accounts);

        let report = converge(&write_config(dir.path(), 8081), &accounts).report;
        let changed: Vec<&str> = report
            .entries
            .iter()
            .filter(|e| e.state == DeclarationState::Succeeded { changed: true })
            .map(|e| e.address.as_str())
            .collect();
        let file = format!("file[{}/etc/app/app.conf]", dir.path().display());
        assert_eq!(changed, vec![file.as_str()]);
        assert!(
            fs::read_to_string(dir.path().join("etc/app/app.conf"))
                .unwrap()
                .starts_with("listen = 8081\n")
        );
    }

    #[test]
    fn test_dry_run_changes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let accounts = Arc::new(FakeAccounts::default());
        let config = write_config(dir.path(), 8080);

        let providers = planner::tests::fake_providers(Arc::clone(&accounts));
        let opts = execute_options(
            &config.settings,
            &Overrides {
                dry_run: true,
                ..Overrides::default()
            },
        );
        let run_list = build_run_list(&config, &providers, &opts).unwrap();
        let timed = run(&run_list, &opts, &SystemProbe, &mut ConsoleProgress::quiet());

        assert!(timed.report.dry_run);
        assert_eq!(timed.report.summary.changed, 3);
        assert!(timed.report.entries.iter().all(|e| e.diff.is_some()));
        assert!(!dir.path().join("etc/app").exists());
        assert!(accounts.calls.lock().unwrap().is_empty());
    }

    #[test]
    fn test_json_report() {
        let dir = tempfile::tempdir().unwrap();
        let accounts = Arc::new(FakeAccounts::default());
        let timed = converge(&write_config(dir.path(), 8080), &accounts);

        let mut out = Vec::new();
        timed.write_json(&mut out).unwrap();
        let json: serde_json::Value = serde_json::from_slice(&out).unwrap();

        assert!(json["started_at"].is_string());
        assert_eq!(json["dry_run"], false);
        assert_eq!(json["summary"]["changed"], 3);
        assert_eq!(json["entries"][0]["address"], "user[app]");
        assert_eq!(json["entries"][0]["state"]["state"], "succeeded");
        assert!(json["halted"].is_null());
    }
}
