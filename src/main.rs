use anyhow::{Context, Result};
use clap::Parser;
use epub_translation_cli::api_constants::error_messages;
use epub_translation_cli::config::{Cli, Command, ExtractionConfig, TranslateArgs};
use epub_translation_cli::error::TranslationError;
use epub_translation_cli::health::{check_mapping, inspect_range, list_projects};
use epub_translation_cli::project::{edit_translation, export_epub, import_epub, translate_mapping};
use epub_translation_cli::stats::{
    print_export_stats, print_health_report, print_import_stats, print_line_diagnoses,
    print_project_list, print_translate_stats,
};
use epub_translation_cli::translator::{
    BatchLimits, CancelFlag, ChunkAligner, HttpBackend, PromptTemplate, RetryPolicy,
};
use epub_translation_cli::utils::{init_logging, load_glossary};
use std::collections::BTreeMap;
use std::time::Instant;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // 初始化日志系统
    init_logging(cli.verbose, cli.quiet);

    if let Err(e) = run(cli.command, cli.quiet).await {
        match e.downcast_ref::<TranslationError>() {
            Some(TranslationError::TranslationApi {
                status_code: 401 | 403,
                ..
            }) => error!("🔑 {}", error_messages::AUTH_ERROR),
            Some(err) if err.is_missing_capability() => {
                error!("🧩 当前构建不支持该EPUB使用的格式，文件本身未必损坏")
            }
            _ => {}
        }
        error!("❌ 执行失败: {:#}", e);
        std::process::exit(1);
    }

    Ok(())
}

async fn run(command: Command, quiet: bool) -> Result<()> {
    let start = Instant::now();

    match command {
        Command::Import {
            input,
            no_images,
            image_text_threshold,
        } => {
            info!("📥 导入: {}", input.display());
            let extraction = ExtractionConfig {
                image_text_threshold,
                include_images: !no_images,
            };
            let summary = tokio::task::spawn_blocking(move || import_epub(&input, &extraction))
                .await
                .context("导入任务异常退出")??;
            if !quiet {
                print_import_stats(&summary, start.elapsed());
            }
        }
        Command::Export { mapping, output } => {
            info!("📤 导出: {}", mapping.display());
            let summary =
                tokio::task::spawn_blocking(move || export_epub(&mapping, output.as_deref()))
                    .await
                    .context("导出任务异常退出")??;
            if !quiet {
                print_export_stats(&summary, start.elapsed());
            }
        }
        Command::Translate(args) => {
            translate(args, quiet, start).await?;
        }
        Command::Check { mapping } => {
            let report = check_mapping(&mapping)
                .with_context(|| format!("检查映射失败: {}", mapping.display()))?;
            if !quiet {
                print_health_report(&report);
            }
        }
        Command::Inspect {
            mapping,
            start: first,
            end,
        } => {
            let lines = inspect_range(&mapping, first, end)?;
            print_line_diagnoses(&lines);
        }
        Command::Edit {
            mapping,
            line,
            text,
        } => {
            edit_translation(&mapping, line, &text)?;
            if !quiet {
                println!("✅ 第 {} 段译文已更新", line);
            }
        }
        Command::Status { root } => {
            let projects = list_projects(&root)?;
            print_project_list(&projects);
        }
    }

    Ok(())
}

/// 翻译子命令
async fn translate(args: TranslateArgs, quiet: bool, start: Instant) -> Result<()> {
    let glossary = match &args.glossary {
        Some(path) => load_glossary(path)
            .with_context(|| format!("读取术语表失败: {}", path.display()))?,
        None => BTreeMap::new(),
    };
    if !glossary.is_empty() {
        info!("📖 术语表: {} 条", glossary.len());
    }

    let config = args.to_config(glossary);
    config.validate()?;
    if config.api_key().is_none() {
        warn!("⚠️  未设置API密钥，请求将不带认证头");
    }

    info!("🚀 开始翻译: {}", args.mapping.display());
    info!("🌐 目标语言: {}", config.target_lang());
    info!("🔗 API地址: {}", config.api_url());

    let backend = HttpBackend::new(&config)?;
    let aligner = ChunkAligner::new(
        backend,
        PromptTemplate::from_config(&config),
        RetryPolicy::fixed(config.max_attempts(), config.retry_delay()),
    );
    let limits = BatchLimits {
        max_lines: config.batch_size(),
        max_chars: config.max_chars(),
    };

    let cancel = CancelFlag::new();
    let signal_flag = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("⏹️  收到中断信号，当前批次结束后停止");
            signal_flag.cancel();
        }
    });

    let report = translate_mapping(
        &args.mapping,
        &aligner,
        limits,
        config.repair_passes(),
        &cancel,
    )
    .await?;

    if !quiet {
        print_translate_stats(&report, start.elapsed());
    }
    if report.remaining > 0 && !report.cancelled {
        warn!("⚠️  仍有 {} 段未翻译，可再次运行translate继续", report.remaining);
    }
    Ok(())
}
