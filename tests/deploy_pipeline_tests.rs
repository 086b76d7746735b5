use anyhow::Result;
use std::cell::RefCell;
use std::collections::VecDeque;
use std::fs;
use std::path::Path;
use tempfile::TempDir;

use deployr::config::{EffectiveOptions, Overrides, ProjectConfig, CONFIG_FILE, IGNORE_FILE};
use deployr::handlers::push::{handle_push, PushOutcome};
use deployr::handlers::{diff, pull, Invocation, Outcome};
use deployr::process::{CommandLine, ProcessOutput, ProcessRunner};
use deployr::prompt::Confirm;

/// Scripted server: answers rsync with itemized output and remote shells
/// with an empty success
struct ScriptedServer {
    itemized: String,
    calls: RefCell<Vec<CommandLine>>,
    interactive: RefCell<Vec<CommandLine>>,
}

impl ScriptedServer {
    fn new(itemized: &str) -> Self {
        Self {
            itemized: itemized.to_string(),
            calls: RefCell::new(Vec::new()),
            interactive: RefCell::new(Vec::new()),
        }
    }
}

impl ProcessRunner for ScriptedServer {
    fn run(&self, command: &CommandLine, _stdin: Option<&[u8]>) -> Result<ProcessOutput> {
        self.calls.borrow_mut().push(command.clone());
        let stdout = if command.program == "rsync" {
            self.itemized.as_bytes().to_vec()
        } else {
            Vec::new()
        };
        Ok(ProcessOutput {
            stdout,
            ..Default::default()
        })
    }

    fn run_interactive(&self, command: &CommandLine) -> Result<i32> {
        self.interactive.borrow_mut().push(command.clone());
        Ok(0)
    }
}

struct Answers(RefCell<VecDeque<bool>>);

impl Answers {
    fn new(answers: &[bool]) -> Self {
        Self(RefCell::new(answers.iter().copied().collect()))
    }
}

impl Confirm for Answers {
    fn confirm(&self, _message: &str, _default: bool) -> Result<bool> {
        Ok(self.0.borrow_mut().pop_front().unwrap_or(false))
    }
}

const CONFIG: &str = r#"
server = "deploy@web1.example.com"
remote_path = "/var/www/site"
ignore = ["node_modules"]
color = false
paginate = false

[environments.production]
server = "deploy@prod.example.com"
remote_path = "/srv/production"
backup_path = ".snapshots"
"#;

fn project() -> TempDir {
    let temp = TempDir::new().unwrap();
    fs::write(temp.path().join(CONFIG_FILE), CONFIG).unwrap();
    fs::write(temp.path().join(IGNORE_FILE), "- *.tmp\n").unwrap();
    fs::create_dir_all(temp.path().join("public/css")).unwrap();
    fs::write(temp.path().join("public/css/site.css"), "body {}\n").unwrap();
    fs::write(temp.path().join("public/index.html"), "<h1>hi</h1>\n").unwrap();
    temp
}

fn resolve(root: &Path, args: &[&str]) -> EffectiveOptions {
    let (root, config) = ProjectConfig::discover(root).unwrap();
    let overrides = Overrides::parse(args).unwrap();
    EffectiveOptions::resolve(&root, &config, &overrides, false).unwrap()
}

#[test]
fn test_production_push_targets_environment() {
    let temp = project();
    let options = resolve(temp.path(), &["env=production"]);
    let server = ScriptedServer::new(">f+++++++++ public/index.html\n");
    let answers = Answers::new(&[true]);
    let invocation = Invocation {
        options: &options,
        runner: &server,
        confirm: &answers,
        cwd: temp.path().to_path_buf(),
    };

    let PushOutcome::Done(report) = handle_push(&invocation).unwrap() else {
        panic!("push did not complete");
    };
    assert!(report.failures.is_empty(), "{:?}", report.failures);

    let transfer = server.interactive.borrow()[0].clone();
    let args = transfer.args;
    let n = args.len();
    assert_eq!(args[n - 1], "deploy@prod.example.com:/srv/production/");

    let epoch = report.epoch.unwrap();
    assert!(args.contains(&format!("--backup-dir=.snapshots/{epoch}")));
    assert!(args.contains(&"--exclude=/.snapshots".to_string()));
    assert!(args.contains(&"--exclude=node_modules".to_string()));

    // The ignore file is merged ahead of every built-in exclude
    let merge = args.iter().position(|a| a.starts_with("--filter=merge ")).unwrap();
    let first_exclude = args.iter().position(|a| a.starts_with("--exclude=")).unwrap();
    assert!(merge < first_exclude);
}

#[test]
fn test_restricted_push_whitelists_ancestors() {
    let temp = project();
    let options = resolve(temp.path(), &["path=public/css/site.css"]);
    let server = ScriptedServer::new(">f.st...... public/css/site.css\n");
    let answers = Answers::new(&[true]);
    let invocation = Invocation {
        options: &options,
        runner: &server,
        confirm: &answers,
        cwd: temp.path().to_path_buf(),
    };

    handle_push(&invocation).unwrap();

    let dry_run = server.calls.borrow()[0].clone();
    let filters: Vec<&str> = dry_run
        .args
        .iter()
        .map(String::as_str)
        .filter(|a| a.starts_with("--include=") || a.starts_with("--exclude=/public") || *a == "--exclude=/*")
        .collect();

    assert_eq!(
        filters,
        vec![
            "--include=/public/css/site.css",
            "--include=/public/css/",
            "--include=/public/",
            "--exclude=/public/css/*",
            "--exclude=/public/*",
            "--exclude=/*",
        ]
    );
}

#[test]
fn test_restriction_matching_nothing_transfers_nothing() {
    let temp = project();
    let options = resolve(temp.path(), &["path=does-not-exist/*"]);
    let server = ScriptedServer::new("");
    let answers = Answers::new(&[]);
    let invocation = Invocation {
        options: &options,
        runner: &server,
        confirm: &answers,
        cwd: temp.path().to_path_buf(),
    };

    assert_eq!(handle_push(&invocation).unwrap(), PushOutcome::NothingToDo);
    let dry_run = server.calls.borrow()[0].clone();
    assert!(dry_run.args.contains(&"--exclude=/*".to_string()));
    assert!(!dry_run.args.iter().any(|a| a.starts_with("--include=")));
}

#[test]
fn test_pull_never_backs_up() {
    let temp = project();
    let options = resolve(temp.path(), &[]);
    let server = ScriptedServer::new(">f+++++++++ uploads/a.jpg\n");
    let answers = Answers::new(&[true]);
    let invocation = Invocation {
        options: &options,
        runner: &server,
        confirm: &answers,
        cwd: temp.path().to_path_buf(),
    };

    assert_eq!(pull::handle_pull(&invocation).unwrap(), Outcome::Completed);
    let transfer = server.interactive.borrow()[0].clone();
    assert!(!transfer.args.iter().any(|a| a.starts_with("--backup")));
    assert_eq!(
        transfer.args[transfer.args.len() - 2],
        "deploy@web1.example.com:/var/www/site/"
    );
}

#[test]
fn test_diff_of_new_files_needs_no_remote_content() {
    let temp = project();
    let options = resolve(temp.path(), &[]);
    let server = ScriptedServer::new(">f+++++++++ public/index.html\n");
    let answers = Answers::new(&[]);
    let invocation = Invocation {
        options: &options,
        runner: &server,
        confirm: &answers,
        cwd: temp.path().to_path_buf(),
    };

    assert_eq!(diff::handle_diff(&invocation).unwrap(), Outcome::Completed);
    // Only the dry run; nothing to fetch for a brand new file
    assert_eq!(server.calls.borrow().len(), 1);
}
