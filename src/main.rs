use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;

use crew::agent::AgentRegistry;
use crew::clock::{Clock, SystemClock};
use crew::cli::{Cli, Commands, ConfigCommand};
use crew::command_executor::CommandExecutor;
use crew::config;
use crew::error::CrewError;
use crew::git::Repository;
use crew::lifecycle::{self, Engine};
use crew::session::SessionManager;
use crew::store::{CommentType, ListFilter, Status, Store, Task, TriState};
use crew::styling::{print_error, print_warning, println};
use crew::worktree::WorktreeManager;

fn init_logging(verbose: bool) {
    let default_filter = if verbose { "warn,crew=info" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter)).init();
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            print_error(&err.to_string());
            ExitCode::from(err.exit_code() as u8)
        }
    }
}

fn run(cli: &Cli) -> Result<(), CrewError> {
    let dir: PathBuf = cli.directory.clone().unwrap_or(std::env::current_dir().map_err(|e| CrewError::io("reading cwd", e))?);
    let repo = Repository::at(dir);
    let repo_root = repo.root()?;
    let git_dir = repo.common_git_dir()?;
    let crew_dir = lifecycle::crew_dir(&git_dir);

    let loaded = config::load(&repo_root, &crew_dir)?;
    for warning in &loaded.warnings {
        print_warning(warning);
    }
    let config_sources = loaded.sources.clone();
    let config = loaded.config;

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let store = Store::new(crew_dir.clone(), clock.clone());
    store.initialize_namespace(&cli.namespace)?;
    let worktree = WorktreeManager::new(repo.clone(), crew_dir.clone());
    let sessions = SessionManager::new(crew_dir.clone());
    let registry = AgentRegistry::new(&config);
    let config = Arc::new(config);
    let store = Arc::new(store);
    let engine = Engine {
        store: store.clone(),
        worktree: Arc::new(worktree),
        sessions: Arc::new(sessions),
        repo: Arc::new(repo.clone()),
        registry: Arc::new(registry),
        config: config.clone(),
        clock: clock.clone(),
        crew_dir: crew_dir.clone(),
    };

    match &cli.command {
        Commands::New { title, base, parent, label, skip_review } => {
            if title.trim().is_empty() {
                return Err(CrewError::EmptyTitle);
            }
            let base_branch = match base {
                Some(b) => b.clone(),
                None => repo.default_branch()?,
            };
            let id = store.next_id(&cli.namespace)?;
            let mut task = Task::new(cli.namespace.as_str(), id, title.clone(), base_branch, clock.now());
            task.parent_id = *parent;
            task.labels = label.iter().cloned().collect();
            task.skip_review = TriState::from_bool_opt(*skip_review);
            store.save(&task)?;
            println!("{id}");
        }
        Commands::Start { id, message } => {
            let task = engine.start(&cli.namespace, *id, message.as_deref())?;
            println!("task {} started ({})", task.id, task.status);
        }
        Commands::Show { id } => {
            let task = store.get(&cli.namespace, *id)?.ok_or_else(|| CrewError::TaskNotFound { namespace: cli.namespace.clone(), id: *id })?;
            print_task(&task);
        }
        Commands::List { parent, label, status } => {
            let status = status.as_deref().map(parse_status).transpose()?;
            let filter = ListFilter { parent_id: *parent, labels: label.iter().cloned().collect(), status };
            for task in store.list(&cli.namespace, &filter)? {
                println!("{}\t{}\t{}", task.id, task.status, task.title);
            }
        }
        Commands::Edit { id, title, description } => {
            let mut task = store.get(&cli.namespace, *id)?.ok_or_else(|| CrewError::TaskNotFound { namespace: cli.namespace.clone(), id: *id })?;
            if let Some(title) = title {
                task.title = title.clone();
            }
            if let Some(description) = description {
                task.description = description.clone();
            }
            store.save(&task)?;
        }
        Commands::Comment { id, text, author } => {
            store.add_comment(&cli.namespace, *id, author, text, Some(CommentType::Note))?;
        }
        Commands::Complete { id } => {
            let task = engine.complete(&cli.namespace, *id)?;
            println!("task {} is now {}", task.id, task.status);
        }
        Commands::Review { id, lgtm, note } => {
            let task = match lgtm {
                Some(verdict) => engine.record_review_verdict(&cli.namespace, *id, *verdict, note)?,
                None => engine.start_review(&cli.namespace, *id)?,
            };
            println!("task {} is now {}", task.id, task.status);
        }
        Commands::Merge { id } => {
            let task = engine.merge(&cli.namespace, *id)?;
            println!("task {} merged ({})", task.id, task.status);
        }
        Commands::Abandon { id, reason } => {
            let task = engine.abandon(&cli.namespace, *id, reason.as_deref())?;
            println!("task {} closed ({})", task.id, task.status);
        }
        Commands::Attach { id, review } => {
            let task = store.get(&cli.namespace, *id)?.ok_or_else(|| CrewError::TaskNotFound { namespace: cli.namespace.clone(), id: *id })?;
            let name = if *review { task.reviewer_session_name() } else { task.worker_session_name() };
            engine.sessions.attach(&name)?;
        }
        Commands::Peek { id, lines, review } => {
            let task = store.get(&cli.namespace, *id)?.ok_or_else(|| CrewError::TaskNotFound { namespace: cli.namespace.clone(), id: *id })?;
            let name = if *review { task.reviewer_session_name() } else { task.worker_session_name() };
            print!("{}", engine.sessions.peek(&name, *lines)?);
        }
        Commands::SendKeys { id, keys, review } => {
            let task = store.get(&cli.namespace, *id)?.ok_or_else(|| CrewError::TaskNotFound { namespace: cli.namespace.clone(), id: *id })?;
            let name = if *review { task.reviewer_session_name() } else { task.worker_session_name() };
            engine.sessions.send(&name, keys)?;
        }
        Commands::Diff { id } => {
            let task = store.get(&cli.namespace, *id)?.ok_or_else(|| CrewError::TaskNotFound { namespace: cli.namespace.clone(), id: *id })?;
            let path = engine.worktree.resolve(&task.branch_name())?;
            let executor = CommandExecutor::new();
            let cmd = config.diff_command.clone().unwrap_or_else(|| format!("git diff {}...HEAD", task.base_branch));
            executor.run_streaming(&cmd, &path, &[], std::io::stdout(), std::io::stderr())?;
        }
        Commands::SetReviewMode { mode } => {
            let parsed: config::ReviewMode = mode.parse().map_err(|_| CrewError::InvalidReviewMode { value: mode.clone() })?;
            config::set_review_mode(&crew_dir, parsed)?;
        }
        Commands::Config(sub) => match sub {
            ConfigCommand::Init => {
                let path = config::init_repo_config(&repo_root)?;
                println!("wrote {}", path.display());
            }
            ConfigCommand::Show => {
                print_config(&config_sources);
            }
        },
    }

    Ok(())
}

fn parse_status(s: &str) -> Result<Status, CrewError> {
    use std::str::FromStr;
    Status::from_str(s).map_err(|_| CrewError::Other(format!("unknown status `{s}`")))
}

fn print_task(task: &Task) {
    println!("# {} ({})", task.title, task.status);
    println!("id: {}", task.id);
    println!("base_branch: {}", task.base_branch);
    if let Some(agent) = &task.agent {
        println!("agent: {agent}");
    }
    if !task.description.is_empty() {
        println!();
        println!("{}", task.description);
    }
}

fn print_config(sources: &std::collections::BTreeMap<String, config::ConfigSource>) {
    for (key, source) in sources {
        println!("{key} = {source}");
    }
}
