//! 阅片平台命令行

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use mammo_admin::{init_tracing, AppConfig, ConfigManager, ReviewSystem};
use mammo_core::{CaseStatus, ImageUpload, MammoError, NewUser, UserRole, UserStatus, UserUpdate};
use mammo_identity::CodeKind;
use mammo_integration::ContactInquiry;
use mammo_workflow::CaseFilter;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::debug;

/// 命令行参数
#[derive(Parser, Debug)]
#[command(name = "mammo")]
#[command(about = "乳腺影像AI辅助阅片平台")]
struct Cli {
    /// 配置文件路径
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// 覆盖数据目录
    #[arg(long, global = true)]
    data_dir: Option<String>,

    /// 覆盖日志级别
    #[arg(short, long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// 自助注册，验证码发送到邮箱
    Register {
        #[arg(long)]
        name: String,
        #[arg(long)]
        email: String,
        #[arg(long)]
        password: String,
        #[arg(long, default_value = "Doctor")]
        role: UserRole,
        #[arg(long, default_value = "")]
        specialization: String,
    },
    /// 提交注册验证码
    Verify {
        #[arg(long)]
        email: String,
        #[arg(long)]
        code: String,
    },
    Login {
        #[arg(long)]
        email: String,
        #[arg(long)]
        password: String,
    },
    Logout,
    /// 显示当前登录用户
    Whoami,
    /// 申请重置密码
    Forgot {
        #[arg(long)]
        email: String,
    },
    /// 凭重置码设置新密码
    Reset {
        #[arg(long)]
        email: String,
        #[arg(long)]
        code: String,
        #[arg(long)]
        password: String,
    },
    /// 重发验证码
    Resend {
        #[arg(long)]
        email: String,
        #[arg(long, value_enum, default_value = "verification")]
        purpose: PurposeArg,
    },
    #[command(subcommand)]
    Users(UsersCommand),
    #[command(subcommand)]
    Cases(CasesCommand),
    /// 统计指标
    Stats {
        #[arg(long)]
        json: bool,
    },
    /// 投递联系表单
    Contact {
        #[arg(long)]
        name: String,
        #[arg(long)]
        email: String,
        #[arg(long, default_value = "General inquiry")]
        subject: String,
        #[arg(long)]
        message: String,
    },
    /// 写出默认配置文件
    InitConfig {
        #[arg(long, default_value = "mammo.toml")]
        path: PathBuf,
    },
}

#[derive(Subcommand, Debug)]
enum UsersCommand {
    List,
    Add(AddUserArgs),
    SetStatus {
        #[arg(long)]
        email: String,
        #[arg(long)]
        status: UserStatus,
    },
}

#[derive(Args, Debug)]
struct AddUserArgs {
    #[arg(long)]
    name: String,
    #[arg(long)]
    email: String,
    #[arg(long)]
    password: String,
    #[arg(long)]
    role: UserRole,
    #[arg(long, default_value = "")]
    specialization: String,
}

#[derive(Subcommand, Debug)]
enum CasesCommand {
    List {
        #[arg(long, value_enum)]
        status: Option<StatusArg>,
        /// 患者标识前缀
        #[arg(long)]
        patient: Option<String>,
        #[arg(long, default_value_t = 50)]
        limit: usize,
        #[arg(long, default_value_t = 0)]
        offset: usize,
    },
    Show {
        #[arg(long)]
        id: String,
    },
    /// 列出出现过的患者标识
    Patients,
    /// 上传影像并登记病例
    Create {
        #[arg(long)]
        patient: String,
        #[arg(long)]
        image: PathBuf,
        /// 缺省时按扩展名推断
        #[arg(long)]
        mime: Option<String>,
    },
    Analyze {
        #[arg(long)]
        id: String,
    },
    Notes {
        #[arg(long)]
        id: String,
        #[arg(long)]
        text: String,
    },
    /// 就分析结果追问
    Chat {
        #[arg(long)]
        id: String,
        #[arg(long)]
        message: String,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum PurposeArg {
    Verification,
    Reset,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum StatusArg {
    Pending,
    Analyzed,
    InReview,
}

impl From<StatusArg> for CaseStatus {
    fn from(arg: StatusArg) -> Self {
        match arg {
            StatusArg::Pending => CaseStatus::Pending,
            StatusArg::Analyzed => CaseStatus::Analyzed,
            StatusArg::InReview => CaseStatus::InReview,
        }
    }
}

fn guess_mime(path: &Path) -> String {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());
    match ext.as_deref() {
        Some("png") => "image/png",
        Some("webp") => "image/webp",
        Some("gif") => "image/gif",
        _ => "image/jpeg",
    }
    .to_string()
}

fn load_config(cli: &Cli) -> Result<AppConfig> {
    let manager = ConfigManager::new(cli.config.as_deref())?;
    let mut config = manager.get_config().clone();
    if let Some(dir) = &cli.data_dir {
        config.storage.data_dir = dir.clone();
    }
    if let Some(level) = &cli.log_level {
        config.logging.level = level.clone();
    }
    Ok(config)
}

async fn run(cli: Cli) -> Result<()> {
    if let Command::InitConfig { path } = &cli.command {
        ConfigManager::write_toml(&AppConfig::default(), path)?;
        println!("Wrote default configuration to {}", path.display());
        return Ok(());
    }

    let config = load_config(&cli)?;
    init_tracing(&config.logging)?;
    let mut system = ReviewSystem::from_config(&config)?;
    debug!("Using {} storage at {}", config.storage.backend, config.storage.data_dir);

    match cli.command {
        Command::Register {
            name,
            email,
            password,
            role,
            specialization,
        } => {
            let pending = system
                .register(&name, &email, &password, role, &specialization)
                .await?;
            println!("Verification code sent to {}", pending);
        }
        Command::Verify { email, code } => {
            let user = system.verify(&email, &code)?;
            println!("{} is now {}", user.email, user.status);
        }
        Command::Login { email, password } => {
            let user = system.login(&email, &password)?;
            println!("Signed in as {} ({})", user.name, user.role);
        }
        Command::Logout => {
            system.logout()?;
            println!("Signed out");
        }
        Command::Whoami => match system.current_user() {
            Some(user) => println!("{} <{}> {} {}", user.name, user.email, user.role, user.status),
            None => println!("Not signed in"),
        },
        Command::Forgot { email } => {
            system.request_password_reset(&email).await?;
            println!("Reset code sent to {}", email.trim());
        }
        Command::Reset {
            email,
            code,
            password,
        } => {
            system.reset_password(&email, &code, &password)?;
            println!("Password updated");
        }
        Command::Resend { email, purpose } => {
            let kind = match purpose {
                PurposeArg::Verification => CodeKind::Verification,
                PurposeArg::Reset => CodeKind::PasswordReset,
            };
            system.resend_code(&email, kind).await?;
            println!("Code resent to {}", email.trim());
        }
        Command::Users(command) => run_users(&mut system, command)?,
        Command::Cases(command) => run_cases(&mut system, command).await?,
        Command::Stats { json } => {
            let stats = system.stats()?;
            if json {
                println!("{}", serde_json::to_string_pretty(&stats)?);
            } else {
                println!("Total scans:      {}", stats.total_scans);
                println!("Malignant found:  {}", stats.malignant_found);
                println!("Avg confidence:   {:.2}", stats.avg_confidence);
                println!("Active doctors:   {}", stats.active_doctors);
                for day in &stats.daily_scans {
                    println!("  {}  {}", day.date, day.count);
                }
                for share in &stats.diagnosis_breakdown {
                    println!(
                        "  {:<10} {:>3}  {:>6.2}%",
                        share.diagnosis.to_string(),
                        share.count,
                        share.percentage
                    );
                }
            }
        }
        Command::Contact {
            name,
            email,
            subject,
            message,
        } => {
            system
                .contact(ContactInquiry {
                    name,
                    email,
                    subject,
                    message,
                })
                .await?;
            println!("Inquiry sent");
        }
        Command::InitConfig { .. } => {}
    }
    Ok(())
}

fn run_users(system: &mut ReviewSystem, command: UsersCommand) -> Result<()> {
    match command {
        UsersCommand::List => {
            for user in system.users()? {
                println!(
                    "{:<36} {:<28} {:<10} {:<10} {}",
                    user.id,
                    user.email,
                    user.role.to_string(),
                    user.status.to_string(),
                    user.joined_at
                );
            }
        }
        UsersCommand::Add(args) => {
            let user = system.add_user(NewUser {
                name: args.name,
                email: args.email,
                password: args.password,
                role: args.role,
                specialization: args.specialization,
            })?;
            println!("Added {} ({})", user.email, user.id);
        }
        UsersCommand::SetStatus { email, status } => {
            let user = system.update_user_by_email(&email, UserUpdate::status(status))?;
            println!("{} is now {}", user.email, user.status);
        }
    }
    Ok(())
}

async fn run_cases(system: &mut ReviewSystem, command: CasesCommand) -> Result<()> {
    match command {
        CasesCommand::List {
            status,
            patient,
            limit,
            offset,
        } => {
            let filter = CaseFilter {
                status: status.map(|s| vec![s.into()]),
                patient_prefix: patient,
                limit: Some(limit),
                offset: Some(offset),
                ..Default::default()
            };
            for case in system.query_cases(&filter)? {
                let verdict = case
                    .analysis_result
                    .as_ref()
                    .map(|r| format!("{} {:.2}", r.diagnosis, r.confidence))
                    .unwrap_or_else(|| "-".to_string());
                println!(
                    "{:<38} {:<16} {} {:<10} {}",
                    case.id,
                    case.patient_id,
                    case.date,
                    case.status.to_string(),
                    verdict
                );
            }
        }
        CasesCommand::Show { id } => {
            let case = system.get_case(&id)?;
            println!("{}", serde_json::to_string_pretty(case)?);
        }
        CasesCommand::Patients => {
            for patient in system.patient_ids()? {
                println!("{}", patient);
            }
        }
        CasesCommand::Create {
            patient,
            image,
            mime,
        } => {
            let bytes = std::fs::read(&image)
                .with_context(|| format!("Cannot read image {}", image.display()))?;
            let mime_type = mime.unwrap_or_else(|| guess_mime(&image));
            let case = system.create_case(&patient, ImageUpload { bytes, mime_type })?;
            println!("Created {} for {}", case.id, case.patient_id);
        }
        CasesCommand::Analyze { id } => {
            let case = system.request_analysis(&id).await?;
            if let Some(result) = &case.analysis_result {
                println!("{}: {} ({:.2})", case.id, result.diagnosis, result.confidence);
                println!("{}", result.explanation);
                for factor in &result.factors {
                    println!("  - {}", factor);
                }
            }
        }
        CasesCommand::Notes { id, text } => {
            let case = system.update_notes(&id, &text)?;
            println!("{} is now {}", case.id, case.status);
        }
        CasesCommand::Chat { id, message } => {
            let mut stdout = std::io::stdout();
            system
                .continue_chat(&id, &message, |fragment| {
                    let _ = write!(stdout, "{}", fragment);
                    let _ = stdout.flush();
                })
                .await?;
            println!();
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if let Err(e) = run(cli).await {
        match e.downcast_ref::<MammoError>() {
            Some(inner) if inner.is_user_facing() => eprintln!("{}", inner),
            _ => eprintln!("Error: {:#}", e),
        }
        std::process::exit(1);
    }
}
