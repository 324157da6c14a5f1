use std::time::Duration;

use crate::health::{HealthReport, LineDiagnosis, ProjectStatus};
use crate::project::{ExportSummary, ImportSummary};
use crate::translator::PipelineReport;
use crate::utils::truncate_for_display;

/// 打印导入报告
pub fn print_import_stats(summary: &ImportSummary, elapsed: Duration) {
    println!("\n📊 导入报告:");
    println!("═══════════════════════════════════════");
    println!("   映射目录: {}", summary.mapping_dir.display());
    println!("   文档数: {} 个", summary.documents);
    println!("   段落数: {} 段", summary.units);
    println!("   图片数: {} 张", summary.images);
    if summary.reimport {
        println!("   ♻️  继承译文: {} 段", summary.carried);
    }
    if summary.spine_inferred {
        println!("   ⚠️  阅读顺序为推断结果");
    }
    if !summary.skipped_documents.is_empty() {
        println!("   ⚠️  跳过文档: {} 个", summary.skipped_documents.len());
        for document in &summary.skipped_documents {
            println!("      - {}", document);
        }
    }
    println!("   总耗时: {}", format_duration(elapsed));
}

/// 打印导出报告
pub fn print_export_stats(summary: &ExportSummary, elapsed: Duration) {
    let report = &summary.reconstruction;
    println!("\n📊 导出报告:");
    println!("═══════════════════════════════════════");
    println!("   输出文件: {}", summary.output_path.display());
    println!("   已翻译: {}/{} 段", summary.translated, summary.units);
    println!("   回填段落: {} 段", report.replaced);
    println!(
        "   修改文档: {} 个, 原样保留: {} 个",
        report.documents_changed, report.documents_unchanged
    );
    if report.drifted > 0 {
        println!("   ⚠️  段数漂移文档: {} 个", report.drifted);
    }
    if report.unconsumed > 0 {
        println!("   ⚠️  未对应段落: {} 段", report.unconsumed);
    }
    for document in &report.documents_failed {
        println!("   ❌ 重建失败: {}", document);
    }
    println!("   总耗时: {}", format_duration(elapsed));
}

/// 打印翻译报告
pub fn print_translate_stats(report: &PipelineReport, elapsed: Duration) {
    println!("\n📊 翻译报告:");
    println!("═══════════════════════════════════════");
    println!("   执行轮数: {} 轮", report.passes);
    println!("   处理批次: {} 批", report.batches);
    println!("   新增译文: {} 段", report.translated);
    if report.soft_failures > 0 {
        println!("   ⚠️  失败批次: {} 批", report.soft_failures);
    }
    println!("   剩余未翻译: {} 段", report.remaining);
    if report.cancelled {
        println!("   ⏹️  已中断，进度已保存");
    }
    println!("   总耗时: {}", format_duration(elapsed));
}

/// 打印健康检查报告
pub fn print_health_report(report: &HealthReport) {
    println!("\n🩺 映射检查:");
    println!("═══════════════════════════════════════");
    println!("   项目ID: {}", report.project_id);
    println!(
        "   原始文件: {} {}",
        report.original_file,
        if report.original_exists { "✅" } else { "❌ 不可达" }
    );
    println!(
        "   翻译进度: {}/{} ({:.1}%)",
        report.translated,
        report.total,
        report.progress()
    );
    if report.empty_originals > 0 {
        println!("   ⚠️  空原文: {} 段", report.empty_originals);
    }

    let integrity = &report.integrity;
    if integrity.is_clean() {
        println!("   序号: ✅ 连续");
    } else {
        println!(
            "   序号: ⚠️  缺失 {} 个, 重复 {} 个",
            integrity.gaps.len(),
            integrity.duplicates.len()
        );
    }

    println!("\n📚 章节进度:");
    for (chapter, progress) in &report.chapters {
        println!("   {:<40} {}/{}", chapter, progress.translated, progress.total);
    }
}

/// 打印段落区间
pub fn print_line_diagnoses(lines: &[LineDiagnosis]) {
    for line in lines {
        println!("\n[{}] {}", line.sequence, line.chapter_id);
        println!("   原文: {}", truncate_for_display(&line.original_text, 120));
        println!("   译文: {}", truncate_for_display(&line.translated_text, 120));
        if !line.translated_at.is_empty() {
            println!("   时间: {}", line.translated_at);
        }
        for issue in &line.issues {
            println!("   ⚠️  {}", issue.describe());
        }
    }
    let flagged = lines.iter().filter(|l| !l.issues.is_empty()).count();
    println!("\n共 {} 段, 存在问题 {} 段", lines.len(), flagged);
}

/// 打印项目列表
pub fn print_project_list(projects: &[ProjectStatus]) {
    if projects.is_empty() {
        println!("📭 未找到映射项目");
        return;
    }

    println!("\n📁 映射项目:");
    println!("═══════════════════════════════════════");
    for project in projects {
        println!(
            "   {:<30} {:>6}/{:<6} ({:.1}%)  {}",
            project.project_id,
            project.translated,
            project.total,
            project.progress(),
            project.mapping_dir.display()
        );
    }
}

/// 格式化持续时间
pub fn format_duration(duration: Duration) -> String {
    let millis = duration.as_millis();
    if millis < 1000 {
        format!("{}ms", millis)
    } else if millis < 60_000 {
        format!("{:.3}s", duration.as_secs_f64())
    } else {
        let secs = duration.as_secs();
        format!("{}m{:02}s", secs / 60, secs % 60)
    }
}
