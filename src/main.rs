use std::io::{self, Write};
use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};

use student_mentor::charts::render_text;
use student_mentor::client::MentorClient;
use student_mentor::config::{messages, Config, DEFAULT_DATASET_PATH, DEFAULT_MODEL_PATH, DRAFT_TTL};
use student_mentor::data::{class_distribution, load_data};
use student_mentor::drafts::DraftStore;
use student_mentor::form::FormState;
use student_mentor::logging;
use student_mentor::model::RiskModel;
use student_mentor::profile::AssessmentResult;
use student_mentor::report::{filename, Report, ReportRequest};
use student_mentor::server::{self, AppState};
use student_mentor::terminal::{run_wizard, WizardOutcome};
use student_mentor::ui::{report_error, Notifier, Toast};
use student_mentor::wizard::{Navigation, Wizard};

const DEFAULT_SERVER: &str = "http://127.0.0.1:8501";
const CHART_WIDTH: usize = 30;

#[derive(Parser)]
#[command(name = "student-mentor")]
#[command(about = "Student risk assessment and mentoring advice", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP API and web form
    Serve,
    /// Train the risk model from the student dataset and save the artifact
    Train {
        #[arg(long, default_value = DEFAULT_DATASET_PATH)]
        dataset: PathBuf,
        #[arg(long, default_value = DEFAULT_MODEL_PATH)]
        out: PathBuf,
    },
    /// Fill in the assessment form step by step and show the result
    Assess {
        #[arg(long, default_value = DEFAULT_SERVER)]
        server: String,
        /// Email used for drafts and saved profiles
        #[arg(long)]
        user: Option<String>,
        /// Load this saved profile before starting (requires --user)
        #[arg(long)]
        profile: Option<String>,
        /// Save the answers and result under this profile name (requires --user)
        #[arg(long)]
        save: Option<String>,
        /// Write the PDF report to this path
        #[arg(long)]
        pdf: Option<PathBuf>,
        /// Ignore any saved draft
        #[arg(long)]
        fresh: bool,
        #[arg(long, default_value = ".drafts")]
        drafts: PathBuf,
    },
    /// Check that a server is up
    Health {
        #[arg(long, default_value = DEFAULT_SERVER)]
        server: String,
    },
    /// Render a PDF report from a JSON assessment file
    Report {
        #[arg(long)]
        input: PathBuf,
        #[arg(long)]
        out: Option<PathBuf>,
    },
}

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    logging::init()?;
    let cli = Cli::parse();

    match cli.command {
        Commands::Serve => {
            let config = Config::from_env().context("invalid configuration")?;
            let state = AppState::from_config(config)
                .await
                .context("failed to open the profile store")?;
            server::run(state).await?;
        }
        Commands::Train { dataset, out } => {
            let students = load_data(&dataset)
                .with_context(|| format!("failed to read {}", dataset.display()))?;
            println!("Loaded {} students from {}.", students.len(), dataset.display());
            for (risk, count) in class_distribution(&students) {
                println!("- {risk}: {count}");
            }
            let model = tokio::task::spawn_blocking(move || RiskModel::train(&students)).await??;
            model.save(&out)?;
            let info = model.info();
            println!(
                "{} trained on {} rows, holdout accuracy {:.1}%. Saved to {}.",
                info.algorithm,
                info.training_rows,
                info.accuracy * 100.0,
                out.display()
            );
        }
        Commands::Assess {
            server,
            user,
            profile,
            save,
            pdf,
            fresh,
            drafts,
        } => {
            assess(AssessOptions {
                server,
                user,
                profile,
                save,
                pdf,
                fresh,
                drafts,
            })
            .await?;
        }
        Commands::Health { server } => {
            let client = MentorClient::new(server, None);
            let health = client.health().await?;
            println!(
                "ok: {}, model loaded: {}, server time: {}",
                health.ok, health.models_loaded, health.time
            );
        }
        Commands::Report { input, out } => {
            let body = std::fs::read(&input)
                .with_context(|| format!("failed to read {}", input.display()))?;
            let request: ReportRequest = serde_json::from_slice(&body)?;
            let report = Report::from_request(request)?;
            let now = chrono::Utc::now();
            let out = out.unwrap_or_else(|| PathBuf::from(filename(now)));
            std::fs::write(&out, report.render_pdf(now))?;
            println!("Report written to {}.", out.display());
        }
    }

    Ok(())
}

struct AssessOptions {
    server: String,
    user: Option<String>,
    profile: Option<String>,
    save: Option<String>,
    pdf: Option<PathBuf>,
    fresh: bool,
    drafts: PathBuf,
}

async fn assess(opts: AssessOptions) -> anyhow::Result<()> {
    let client = MentorClient::new(opts.server, opts.user.clone());
    let mut notifier = Notifier::stderr();

    if let Err(err) = client.health().await {
        report_error(&mut notifier, &err);
        return Ok(());
    }

    let mut form = FormState::new();
    let mut wizard = Wizard::new();
    let draft_key = opts.user.clone().unwrap_or_else(|| "anonymous".to_string());
    let drafts = DraftStore::new(&opts.drafts, DRAFT_TTL);

    if let Some(name) = &opts.profile {
        match client.load_profile(name).await {
            Ok(saved) => {
                form.populate(&saved.profile);
                notifier.show(Toast::info(format!("Loaded profile '{name}'.")));
            }
            Err(err) => report_error(&mut notifier, &err),
        }
    } else if opts.fresh {
        drafts.clear(&draft_key)?;
    } else if let Some(draft) = drafts.load(&draft_key)? {
        form = FormState::from_fields(draft.fields);
        while wizard.current() < draft.step {
            if !matches!(wizard.next(&form), Navigation::Moved(_)) {
                break;
            }
        }
        notifier.show(Toast::info(messages::DRAFT_RESTORED));
    }

    let stdin = io::stdin();
    let mut input = stdin.lock();
    let mut stdout = io::stdout();
    let outcome = run_wizard(&mut wizard, &mut form, &mut input, &mut stdout, |step, form| {
        if let Err(err) = drafts.save(&draft_key, step, form.fields()) {
            tracing::warn!("Could not save draft: {err}");
        }
    })?;
    if outcome == WizardOutcome::Quit {
        notifier.show(Toast::info("Answers kept as a draft."));
        return Ok(());
    }

    let result = match client.predict(form.fields()).await {
        Ok(result) => result,
        Err(err) => {
            report_error(&mut notifier, &err);
            return Ok(());
        }
    };
    print_result(&mut stdout, &result)?;

    if let Some(name) = &opts.save {
        let saved = match client.save_profile(name, form.fields(), Some(&result)).await {
            Ok(_) => client.save_assessment(name, &result).await.map(|_| ()),
            Err(err) => Err(err),
        };
        match saved {
            Ok(_) => notifier.show(Toast::success(messages::SAVED)),
            Err(err) => report_error(&mut notifier, &err),
        }
    }

    if let Some(path) = &opts.pdf {
        match client.generate_pdf(&result).await {
            Ok(bytes) => {
                std::fs::write(path, bytes)
                    .with_context(|| format!("failed to write {}", path.display()))?;
                notifier.show(Toast::success(format!("Report saved to {}.", path.display())));
            }
            Err(err) => report_error(&mut notifier, &err),
        }
    }

    drafts.clear(&draft_key)?;
    form.mark_clean();
    Ok(())
}

fn print_result<W: Write>(out: &mut W, result: &AssessmentResult) -> io::Result<()> {
    writeln!(out, "\nRisk: {} ({:.0}% confidence)", result.risk_category, result.confidence * 100.0)?;
    writeln!(out, "Estimated final grade: {}/20", result.prediction)?;
    writeln!(out, "{}", result.risk_descriptor)?;
    if let Some(charts) = &result.charts {
        writeln!(out, "\nTop factors (red raises risk):")?;
        write!(out, "{}", render_text(&charts.shap, CHART_WIDTH))?;
        writeln!(out, "\nGrades vs class average:")?;
        write!(out, "{}", render_text(&charts.grades, CHART_WIDTH))?;
        writeln!(out, "\nClass probabilities:")?;
        write!(out, "{}", render_text(&charts.probabilities, CHART_WIDTH))?;
    }
    writeln!(out, "\nMentoring advice:\n{}", result.mentoring_advice)
}
