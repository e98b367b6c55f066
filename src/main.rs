mod account;
mod cloud;
mod config;
mod directory;
mod gate;
mod local_store;
mod migration;
mod models;
mod onboarding;
mod scout;
mod search;
mod tui;

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use account::{Identity, Tier, UserProfile};
use cloud::{DocumentStore, FirestoreStore};
use config::Config;
use directory::{ClearOutcome, ContactDirectory};
use local_store::LocalStore;
use onboarding::OnboardingProfile;
use scout::{HttpSuggestions, ScoutBot, Step};
use search::{ApiClient, SearchRequest};

#[derive(Parser)]
#[command(name = "offerloop")]
#[command(about = "Find recruiting contacts, keep a contact directory, and get job title ideas")]
struct Cli {
    /// Log progress to stderr
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the local store
    Init,

    /// Sign in with an identity issued by the auth provider
    Login {
        #[arg(long)]
        uid: String,

        #[arg(long)]
        email: String,

        #[arg(long, default_value = "")]
        name: String,

        /// ID token for cloud storage and the backend
        #[arg(long)]
        token: Option<String>,
    },

    /// Forget the signed-in user
    Logout,

    /// Show the signed-in user, credits and monthly usage
    Whoami,

    /// Search for contacts and download the CSV
    Search {
        #[arg(long)]
        job_title: String,

        #[arg(long)]
        company: String,

        #[arg(long)]
        location: String,

        /// Search tier (defaults to the account's tier)
        #[arg(long, value_enum)]
        tier: Option<Tier>,

        /// Resume PDF (required for pro searches)
        #[arg(long)]
        resume: Option<PathBuf>,

        /// Only download the CSV, do not add results to the directory
        #[arg(long)]
        no_save: bool,

        /// Directory for the CSV file
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Manage the contact directory
    Contacts {
        #[command(subcommand)]
        command: ContactCommands,
    },

    /// Copy data stored on this machine into cloud storage
    Migrate,

    /// Chat with Scout for job title ideas
    Scout,

    /// Fill in the onboarding profile
    Onboarding {
        #[command(subcommand)]
        command: OnboardingCommands,
    },

    /// Parse and manage your resume
    Resume {
        #[command(subcommand)]
        command: ResumeCommands,
    },

    /// Suggest values for a form field (job_title, company, location, school)
    Autocomplete { data_type: String, query: String },

    /// Query the recruiting backend
    Backend {
        #[command(subcommand)]
        command: BackendCommands,
    },
}

#[derive(Subcommand)]
enum ContactCommands {
    /// List saved contacts
    List,

    /// Browse contacts interactively
    Browse,

    /// Add contacts from a previously downloaded CSV
    Import { file: PathBuf },

    /// Delete one contact
    Delete { id: String },

    /// Set a contact's status
    Status { id: String, status: String },

    /// Delete every contact
    Clear {
        /// Skip the confirmation prompt
        #[arg(long)]
        yes: bool,
    },
}

#[derive(Subcommand)]
enum OnboardingCommands {
    /// Save answers to the onboarding draft
    Set {
        #[arg(long)]
        first_name: Option<String>,
        #[arg(long)]
        last_name: Option<String>,
        #[arg(long)]
        university: Option<String>,
        #[arg(long)]
        graduation_month: Option<String>,
        #[arg(long)]
        graduation_year: Option<String>,
        #[arg(long)]
        field_of_study: Option<String>,
        #[arg(long)]
        degree_type: Option<String>,
        /// Comma separated
        #[arg(long, value_delimiter = ',')]
        industries: Option<Vec<String>>,
        #[arg(long)]
        job_role: Option<String>,
        /// Comma separated
        #[arg(long, value_delimiter = ',')]
        locations: Option<Vec<String>>,
        /// Comma separated
        #[arg(long, value_delimiter = ',')]
        job_types: Option<Vec<String>>,
    },

    /// Show the profile and how complete it is
    Show,

    /// Complete onboarding
    Finish,

    /// Discard the profile and draft
    Clear,
}

#[derive(Subcommand)]
enum ResumeCommands {
    /// Send a resume PDF to the backend parser
    Parse { file: PathBuf },

    /// Show the parsed resume
    Show,

    /// Forget the parsed resume
    Clear,
}

#[derive(Subcommand)]
enum BackendCommands {
    Health,
    Tiers,
}

fn init_logging(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("info")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .init();
}

fn require_user(local: &LocalStore) -> Result<UserProfile> {
    account::current_user(local)?.ok_or_else(|| anyhow!("Not signed in. Run 'offerloop login' first."))
}

/// The cloud store when storage is set to cloud.
fn open_cloud(config: &Config, token: Option<String>) -> Result<Option<FirestoreStore>> {
    match config.cloud_project()? {
        Some(project) => Ok(Some(FirestoreStore::new(project, token)?)),
        None => Ok(None),
    }
}

fn as_dyn(cloud: &Option<FirestoreStore>) -> Option<&dyn DocumentStore> {
    cloud.as_ref().map(|c| c as &dyn DocumentStore)
}

fn directory_for<'a>(
    local: &'a LocalStore,
    cloud: Option<&'a dyn DocumentStore>,
    user: &UserProfile,
) -> ContactDirectory<'a> {
    match cloud {
        Some(store) => ContactDirectory::cloud(store, &user.uid),
        None => ContactDirectory::local(local, &user.email),
    }
}

fn confirm(prompt: &str) -> bool {
    print!("{} [y/N] ", prompt);
    if io::stdout().flush().is_err() {
        return false;
    }
    let mut answer = String::new();
    if io::stdin().lock().read_line(&mut answer).is_err() {
        return false;
    }
    matches!(answer.trim().to_lowercase().as_str(), "y" | "yes")
}

fn print_migration(report: &migration::MigrationReport) {
    if report.skipped {
        return;
    }
    println!("Migrated local data to cloud storage:");
    let step = |result: Option<migration::StepResult>| match result {
        Some(migration::StepResult::Copied) => "copied",
        Some(migration::StepResult::Failed) => "failed",
        _ => "nothing to copy",
    };
    println!("  Professional info: {}", step(report.professional_info));
    println!("  Resume data: {}", step(report.resume_data));
    println!("  Contact lists: {}", report.contact_keys);
    println!("  Contacts added: {}", report.contacts.created);
    println!("  Duplicates skipped: {}", report.contacts.skipped);
    if !report.failed_keys.is_empty() {
        println!("  Failed: {}", report.failed_keys.join(", "));
    }
}

fn print_profile(profile: &OnboardingProfile) {
    let show = |label: &str, value: &Option<String>| {
        if let Some(v) = value {
            println!("{:<18} {}", label, v);
        }
    };
    let show_list = |label: &str, value: &Option<Vec<String>>| {
        if let Some(v) = value {
            println!("{:<18} {}", label, v.join(", "));
        }
    };
    show("First name:", &profile.first_name);
    show("Last name:", &profile.last_name);
    show("University:", &profile.university);
    show("Graduation month:", &profile.graduation_month);
    show("Graduation year:", &profile.graduation_year);
    show("Field of study:", &profile.field_of_study);
    show("Degree:", &profile.degree_type);
    show_list("Industries:", &profile.industries);
    show("Job role:", &profile.job_role);
    show_list("Locations:", &profile.locations);
    show_list("Job types:", &profile.job_types);
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let config = Config::load()?;
    let local = LocalStore::open()?;

    match cli.command {
        Commands::Init => {
            local.init()?;
            println!("Local store initialized at {}", local.path().display());
        }

        Commands::Login {
            uid,
            email,
            name,
            token,
        } => {
            local.ensure_initialized()?;
            let identity = Identity {
                uid,
                email,
                name,
                picture: None,
                id_token: token,
            };
            let cloud = open_cloud(&config, identity.id_token.clone())?;
            let user = account::sign_in(&local, as_dyn(&cloud), &identity)?;
            println!("Signed in as {} ({})", user.email, user.tier.plan().label);

            if let Some(store) = &cloud {
                print_migration(&migration::migrate(&local, store, &user.uid)?);
            }
            if user.needs_onboarding {
                println!("Welcome! Complete your profile with 'offerloop onboarding set' and 'offerloop onboarding finish'.");
            }
        }

        Commands::Logout => {
            local.ensure_initialized()?;
            account::sign_out(&local)?;
            println!("Signed out.");
        }

        Commands::Whoami => {
            local.ensure_initialized()?;
            let user = require_user(&local)?;
            let plan = user.tier.plan();
            let month = account::current_month_key();
            println!("{} <{}>", if user.name.is_empty() { &user.uid } else { &user.name }, user.email);
            println!("Tier:     {}", plan.label);
            println!("Credits:  {}/{}", user.credits, user.max_credits);
            if user.tier.is_paid() {
                println!(
                    "Emails:   {}/{} this month",
                    user.effective_emails_used(&month),
                    plan.monthly_email_limit
                );
            }
            println!("Storage:  {:?}", config.storage);
            let mut profile = onboarding::load_profile(&local)?;
            profile.merge(onboarding::load_draft(&local)?);
            println!("Profile:  {}% complete", profile.progress());
        }

        Commands::Search {
            job_title,
            company,
            location,
            tier,
            resume,
            no_save,
            output,
        } => {
            local.ensure_initialized()?;
            let mut user = require_user(&local)?;
            let cloud = open_cloud(&config, user.access_token.clone())?;
            let store = as_dyn(&cloud);

            if user.needs_onboarding && !onboarding::is_onboarded(&local, store, &user.uid)? {
                return Err(anyhow!(
                    "Finish onboarding first: 'offerloop onboarding finish'."
                ));
            }

            let tier = tier.unwrap_or(user.tier);
            let month = account::current_month_key();
            let charge = gate::check(&user, tier, resume.is_some(), &month)?;

            let client = ApiClient::new(config.api_url())?.with_user(&user);
            let request = SearchRequest {
                job_title,
                company,
                location,
                user_email: user.email.clone(),
                save_to_directory: !no_save,
            };
            println!("Searching {} contacts ({} tier)...", charge.contacts, tier.plan().label);
            let csv = client.run_search(tier, &request, resume.as_deref())?;

            let out_dir = output.unwrap_or_else(|| PathBuf::from("."));
            std::fs::create_dir_all(&out_dir)
                .with_context(|| format!("Failed to create {}", out_dir.display()))?;
            let path = out_dir.join(search::csv_filename_today(tier));
            std::fs::write(&path, &csv)
                .with_context(|| format!("Failed to write {}", path.display()))?;
            println!("Saved results to {}", path.display());

            gate::apply(&mut user, &charge, &month);
            account::save_user(&local, store, &user)?;
            println!("Used {} credits, {} left.", charge.credits, user.credits);

            if !no_save {
                let rows = search::parse_contacts_csv(&csv)?;
                let stats = directory_for(&local, store, &user).merge(rows)?;
                println!(
                    "Directory: {} added, {} already saved.",
                    stats.created, stats.skipped
                );
            }
        }

        Commands::Contacts { command } => {
            local.ensure_initialized()?;
            let user = require_user(&local)?;
            let cloud = open_cloud(&config, user.access_token.clone())?;
            let directory = directory_for(&local, as_dyn(&cloud), &user);

            match command {
                ContactCommands::List => {
                    let outcome = directory.load();
                    if let Some(message) = outcome.error {
                        return Err(anyhow!(message));
                    }
                    if outcome.contacts.is_empty() {
                        println!("No contacts saved yet.");
                    } else {
                        println!(
                            "{:<10} {:<22} {:<20} {:<26} {:<14}",
                            "ID", "NAME", "COMPANY", "EMAIL", "STATUS"
                        );
                        println!("{}", "-".repeat(96));
                        for c in &outcome.contacts {
                            println!(
                                "{:<10} {:<22} {:<20} {:<26} {:<14}",
                                truncate(&c.id, 8),
                                truncate(&c.full_name(), 20),
                                truncate(&c.company, 18),
                                truncate(&c.email, 24),
                                c.status
                            );
                        }
                        println!("\n{} contact(s) in {} storage", outcome.contacts.len(), directory.backend_label());
                    }
                }

                ContactCommands::Browse => tui::run_browse(&directory)?,

                ContactCommands::Import { file } => {
                    let bytes = std::fs::read(&file)
                        .with_context(|| format!("Failed to read {}", file.display()))?;
                    let rows = search::parse_contacts_csv(&bytes)?;
                    let stats = directory.merge(rows)?;
                    println!("Imported {} contact(s), skipped {} duplicate(s).", stats.created, stats.skipped);
                }

                ContactCommands::Delete { id } => {
                    let id = resolve_contact_id(&directory, &id)?;
                    directory.delete(&id)?;
                    println!("Deleted contact {}.", id);
                }

                ContactCommands::Status { id, status } => {
                    let id = resolve_contact_id(&directory, &id)?;
                    let contact = directory.set_status(&id, &status)?;
                    println!("{}: {}", contact.full_name(), contact.status);
                }

                ContactCommands::Clear { yes } => {
                    let outcome = directory.clear_all(|| yes || confirm("Delete ALL saved contacts?"))?;
                    match outcome {
                        ClearOutcome::Cancelled => println!("Cancelled."),
                        ClearOutcome::Cleared(count) => println!("Deleted {} contact(s).", count),
                    }
                }
            }
        }

        Commands::Migrate => {
            local.ensure_initialized()?;
            let user = require_user(&local)?;
            let cloud = open_cloud(&config, user.access_token.clone())?
                .ok_or_else(|| anyhow!("Migration needs storage = \"cloud\" in {}", Config::path().display()))?;
            let report = migration::migrate(&local, &cloud, &user.uid)?;
            if report.skipped {
                println!("Already migrated.");
            } else {
                print_migration(&report);
            }
        }

        Commands::Scout => {
            run_scout(&config)?;
        }

        Commands::Onboarding { command } => {
            local.ensure_initialized()?;
            match command {
                OnboardingCommands::Set {
                    first_name,
                    last_name,
                    university,
                    graduation_month,
                    graduation_year,
                    field_of_study,
                    degree_type,
                    industries,
                    job_role,
                    locations,
                    job_types,
                } => {
                    let draft = onboarding::update_draft(
                        &local,
                        OnboardingProfile {
                            first_name,
                            last_name,
                            university,
                            graduation_month,
                            graduation_year,
                            field_of_study,
                            degree_type,
                            industries,
                            job_role,
                            locations,
                            job_types,
                            ..Default::default()
                        },
                    )?;
                    let mut profile = onboarding::load_profile(&local)?;
                    profile.merge(draft);
                    println!("Saved. Profile is {}% complete.", profile.progress());
                }

                OnboardingCommands::Show => {
                    let mut profile = onboarding::load_profile(&local)?;
                    profile.merge(onboarding::load_draft(&local)?);
                    print_profile(&profile);
                    println!("\nProgress: {}%", profile.progress());
                    let missing = profile.missing_sections();
                    if !missing.is_empty() {
                        println!("Missing: {}", missing.join(", "));
                    }
                    if profile.onboarding_complete == Some(true) {
                        println!("Onboarding complete.");
                    }
                }

                OnboardingCommands::Finish => {
                    let mut user = require_user(&local)?;
                    let cloud = open_cloud(&config, user.access_token.clone())?;
                    onboarding::finish(&local, as_dyn(&cloud), &mut user)?;
                    println!("Onboarding complete. You have {} credits.", user.credits);
                }

                OnboardingCommands::Clear => {
                    onboarding::clear(&local)?;
                    println!("Onboarding profile cleared.");
                }
            }
        }

        Commands::Resume { command } => {
            local.ensure_initialized()?;
            match command {
                ResumeCommands::Parse { file } => {
                    let user = account::current_user(&local)?;
                    let mut client = ApiClient::new(config.api_url())?;
                    if let Some(user) = &user {
                        client = client.with_user(user);
                    }
                    let resume = client.parse_resume(&file)?;

                    let cloud = match &user {
                        Some(u) => open_cloud(&config, u.access_token.clone())?,
                        None => None,
                    };
                    let target = match (&cloud, &user) {
                        (Some(store), Some(u)) => Some((store as &dyn DocumentStore, u.uid.as_str())),
                        _ => None,
                    };
                    onboarding::store_resume(&local, target, &resume)?;
                    println!("Parsed resume for {}.", resume.name);
                    println!("  {} {} at {}", resume.year, resume.major, resume.university);
                }

                ResumeCommands::Show => match onboarding::load_resume(&local)? {
                    Some(resume) => {
                        println!("Name:       {}", resume.name);
                        println!("Year:       {}", resume.year);
                        println!("Major:      {}", resume.major);
                        println!("University: {}", resume.university);
                        println!("Email:      {}", resume.email);
                        println!("Phone:      {}", resume.phone);
                    }
                    None => println!("No parsed resume."),
                },

                ResumeCommands::Clear => {
                    onboarding::clear_resume(&local)?;
                    println!("Resume cleared.");
                }
            }
        }

        Commands::Autocomplete { data_type, query } => {
            let client = ApiClient::new(config.api_url())?;
            for suggestion in client.autocomplete(&data_type, &query)? {
                println!("{}", suggestion);
            }
        }

        Commands::Backend { command } => {
            let client = ApiClient::new(config.api_url())?;
            let value = match command {
                BackendCommands::Health => client.health()?,
                BackendCommands::Tiers => client.tier_info()?,
            };
            println!("{}", serde_json::to_string_pretty(&value)?);
        }
    }

    Ok(())
}

/// Accepts a full contact id or a unique prefix of one, as shown by
/// `contacts list`.
fn resolve_contact_id(directory: &ContactDirectory, id: &str) -> Result<String> {
    let outcome = directory.load();
    if let Some(message) = outcome.error {
        return Err(anyhow!(message));
    }
    let matches: Vec<&str> = outcome
        .contacts
        .iter()
        .map(|c| c.id.as_str())
        .filter(|c| c.starts_with(id))
        .collect();
    match matches.as_slice() {
        [only] => Ok(only.to_string()),
        [] => Err(anyhow!("Contact '{}' not found", id)),
        _ if matches.contains(&id) => Ok(id.to_string()),
        _ => Err(anyhow!("'{}' matches {} contacts, use more characters", id, matches.len())),
    }
}

fn run_scout(config: &Config) -> Result<()> {
    let mut bot = ScoutBot::new(HttpSuggestions::new(&config.scout_url())?);
    println!("Scout: {}", scout::GREETING);
    println!("(type 'restart' to start over, 'quit' to leave)");

    let stdin = io::stdin();
    loop {
        print!("> ");
        io::stdout().flush()?;
        let mut line = String::new();
        if stdin.lock().read_line(&mut line)? == 0 {
            break;
        }
        let message = line.trim();

        match message.to_lowercase().as_str() {
            "quit" | "exit" => break,
            "restart" | "reset" => {
                println!("Scout: {}", bot.reset());
                continue;
            }
            _ => {}
        }

        if bot.step() == Step::Suggestions {
            if let Ok(number) = message.parse::<usize>() {
                let picked = bot.select(number, |title| {
                    println!("Scout: Great choice! Search with:");
                    println!("  offerloop search --job-title \"{}\" --company ... --location ...", title);
                });
                if !picked {
                    println!("Scout: Pick a number between 1 and {}.", bot.suggestions().len());
                }
                continue;
            }
        }

        for reply in bot.respond(message) {
            println!("Scout: {}", reply);
        }
    }
    Ok(())
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() > max {
        let cut: String = s.chars().take(max.saturating_sub(3)).collect();
        format!("{}...", cut)
    } else {
        s.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_counts_chars() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("Émilie Dubois-Laurent", 10), "Émilie ...");
    }

    #[test]
    fn test_cli_parses_search() {
        let cli = Cli::try_parse_from([
            "offerloop",
            "search",
            "--job-title",
            "Analyst",
            "--company",
            "Stripe",
            "--location",
            "NYC",
            "--tier",
            "pro",
            "--resume",
            "cv.pdf",
        ])
        .unwrap();
        match cli.command {
            Commands::Search { tier, resume, no_save, .. } => {
                assert_eq!(tier, Some(Tier::Pro));
                assert_eq!(resume, Some(PathBuf::from("cv.pdf")));
                assert!(!no_save);
            }
            _ => panic!("expected search"),
        }
    }

    #[test]
    fn test_cli_splits_onboarding_lists() {
        let cli = Cli::try_parse_from([
            "offerloop",
            "onboarding",
            "set",
            "--locations",
            "New York,Boston",
        ])
        .unwrap();
        match cli.command {
            Commands::Onboarding {
                command: OnboardingCommands::Set { locations, first_name, .. },
            } => {
                assert_eq!(locations, Some(vec!["New York".to_string(), "Boston".to_string()]));
                assert_eq!(first_name, None);
            }
            _ => panic!("expected onboarding set"),
        }
    }

    #[test]
    fn test_resolve_contact_id_by_prefix() {
        let local = LocalStore::open_in_memory().unwrap();
        let directory = ContactDirectory::local(&local, "me@school.edu");
        directory
            .merge(vec![models::NewContact {
                email: "a@x.com".to_string(),
                ..Default::default()
            }])
            .unwrap();
        let id = directory.load().contacts[0].id.clone();

        assert_eq!(resolve_contact_id(&directory, &id[..8]).unwrap(), id);
        assert!(resolve_contact_id(&directory, "zzzz-not-an-id").is_err());
    }
}
