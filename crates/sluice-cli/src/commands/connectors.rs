use sluice_connectors::builtin;
use sluice_types::scheme::SchemeToken;

/// Execute the `connectors` command: list the scheme tables.
pub fn execute() {
    let registry = builtin();

    println!("SQL sources (generic SQL adapter):");
    println!("  {}", registry.sql_family_schemes().join(", "));

    println!("\nSources:");
    for scheme in registry.source_schemes() {
        let Some((_, ctor)) = registry.resolve_source_adapter(&SchemeToken::new(scheme)) else {
            continue;
        };
        let adapter = ctor();
        println!(
            "  {:18} {}",
            scheme,
            adapter.incrementality(&format!("{scheme}://"))
        );
    }

    println!("\nDestinations:");
    for scheme in registry.destination_schemes() {
        println!("  {scheme}");
    }
}
