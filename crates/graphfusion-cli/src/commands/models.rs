//! Models 命令

use graphfusion_ai::{context_window_size, known_models, usable_context_window};

pub fn run(model: Option<&str>) {
    if let Some(model) = model {
        println!(
            "{}: context window {} tokens, usable {} tokens",
            model,
            context_window_size(model),
            usable_context_window(model)
        );
        return;
    }

    println!("Known models:");
    println!();
    for (name, size) in known_models() {
        println!("  {:<32} {:>8}  (usable {})", name, size, usable_context_window(name));
    }
}
