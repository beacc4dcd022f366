//! Roles 命令

use graphfusion_agent::RoleRegistry;

pub fn run() {
    let registry = RoleRegistry::with_defaults();

    println!("Default roles:");
    println!();
    for role in registry.roles() {
        println!("  {}", role.name);
        println!("    {}", role.description);
        println!("    skills: {}", role.required_skills.join(", "));
        println!("    responsibilities: {}", role.responsibilities.join(", "));
        println!();
    }
}
