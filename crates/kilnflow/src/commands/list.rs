use colored::Colorize;
use std::path::Path;

/// ビルド対象を依存順に表示
pub fn handle(patterns: &[String], targets: Option<&Path>) -> anyhow::Result<()> {
    let graph = super::load_targets(patterns, targets)?;

    if graph.is_empty() {
        println!("{}", "ビルド対象のイメージがありません".dimmed());
        return Ok(());
    }

    println!("{} ({})", "ビルド順:".bold(), graph.len());
    for (i, target) in graph.order().enumerate() {
        match &target.parent {
            Some(parent) => println!(
                "  {:>3}. {} {}",
                i + 1,
                target.name.cyan(),
                format!("<- {}", parent).dimmed()
            ),
            None => println!("  {:>3}. {}", i + 1, target.name.cyan()),
        }
    }
    Ok(())
}
