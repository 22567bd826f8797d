//! Export and syscall-number inspection tool using the ntrs API

use clap::{Parser, Subcommand};
use ntrs::{Image, hash};
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "ntrs")]
#[command(about = "Inspect PE exports, syscall numbers and syscall sites", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the FNV-1a hash used for module and export lookups
    Hash {
        /// Name to hash (e.g. ntdll.dll, NtClose)
        name: String,

        /// Hash bytes as given instead of lowercased
        #[arg(long)]
        case_sensitive: bool,

        /// Hash the UTF-16 form, as loader entries are hashed
        #[arg(long)]
        wide: bool,
    },

    /// List the export table of a PE file
    Exports {
        /// Input PE file
        input: PathBuf,
    },

    /// Resolve one export of a PE file, following forwarders within it
    Resolve {
        /// Input PE file
        input: PathBuf,

        /// Export name (case-sensitive)
        #[arg(required_unless_present = "ordinal")]
        name: Option<String>,

        /// Resolve by ordinal instead of name
        #[arg(short, long, conflicts_with = "name")]
        ordinal: Option<u16>,

        /// Base address to view the image at (default: its preferred base)
        #[arg(short, long, value_parser = parse_address)]
        base: Option<u64>,
    },

    /// List syscall numbers decoded from an ntdll file
    #[command(alias = "ssn")]
    Syscalls {
        /// Input ntdll.dll (64-bit)
        input: PathBuf,

        /// Also list Nt* exports whose stub does not decode
        #[arg(short, long)]
        all: bool,
    },

    /// List modules loaded in this process
    #[cfg(windows)]
    Modules,

    /// Resolve every syscall site and show its target
    #[cfg(windows)]
    Sites,
}

fn parse_address(s: &str) -> Result<u64, String> {
    let digits = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")).unwrap_or(s);
    u64::from_str_radix(&digits.replace('_', ""), 16).map_err(|e| format!("invalid address {}: {}", s, e))
}

fn open_image(input: &Path) -> Result<Image, String> {
    Image::open(input).map_err(|e| format!("Failed to read {}: {}", input.display(), e))
}

fn hash_name(name: String, case_sensitive: bool, wide: bool) -> Result<(), String> {
    let lowercase = !case_sensitive;
    let value = if wide {
        let units: Vec<u16> = name.encode_utf16().collect();
        hash::fnv1a_wide(&units, lowercase)
    } else {
        hash::fnv1a_str(&name, lowercase)
    };
    println!("{:#010x}  {}", value, name);
    Ok(())
}

fn list_exports(input: PathBuf) -> Result<(), String> {
    let image = open_image(&input)?;
    let exports = image.exports();
    if exports.is_empty() {
        return Err(format!("{} has no exports", input.display()));
    }

    if let Some(name) = image.name() {
        println!("Exports of {} ({}):", name, if image.is_64() { "PE32+" } else { "PE32" });
    }
    println!("{:>7}  {:>10}  Name", "Ordinal", "RVA");
    for export in &exports {
        let name = export.name.as_deref().unwrap_or("<unnamed>");
        match &export.forwarder {
            Some(forwarder) => println!("{:>7}  {:>10}  {} -> {}", export.ordinal, "", name, forwarder),
            None => println!("{:>7}  {:#010x}  {}", export.ordinal, export.rva, name),
        }
    }
    eprintln!("{} exports", exports.len());
    Ok(())
}

fn resolve_export(
    input: PathBuf,
    name: Option<String>,
    ordinal: Option<u16>,
    base: Option<u64>,
) -> Result<(), String> {
    let mut image = open_image(&input)?;
    if let Some(base) = base {
        image = image.with_base(base);
    }

    let address = match (ordinal, &name) {
        (Some(ordinal), _) => image.resolve_ordinal(ordinal),
        (None, Some(name)) => image.resolve(name),
        (None, None) => return Err("an export name or --ordinal is required".to_string()),
    }
    .map_err(|e| format!("{}", e))?;

    println!("{:#x}  (rva {:#x})", address, address - image.base());
    if let Some(name) = &name
        && let Ok(id) = image.syscall_id(name)
    {
        println!("syscall {:#06x} ({})", id, id);
    }
    Ok(())
}

fn list_syscalls(input: PathBuf, all: bool) -> Result<(), String> {
    let image = open_image(&input)?;
    if !image.is_64() {
        return Err(format!("{} is not a 64-bit image", input.display()));
    }

    let entries = if all { image.syscalls_all() } else { image.syscalls() };
    if entries.is_empty() {
        return Err(format!("{} exports no decodable syscall stubs", input.display()));
    }

    for entry in &entries {
        if entry.id == 0 {
            println!("{:>6}  {:#010x}  {}", "-", entry.address - image.base(), entry.name);
        } else {
            println!("{:#06x}  {:#010x}  {}", entry.id, entry.address - image.base(), entry.name);
        }
    }
    eprintln!("{} stubs", entries.len());
    Ok(())
}

#[cfg(windows)]
fn list_modules() -> Result<(), String> {
    let modules = ntrs::Process::current().modules().map_err(|e| format!("{}", e))?;
    for module in &modules {
        println!(
            "{:#018x}  {:#010x}  {}",
            module.base,
            module.size_of_image,
            module.full_name_lossy()
        );
    }
    Ok(())
}

#[cfg(windows)]
fn list_sites() -> Result<(), String> {
    let sites = ntrs::syscall_sites();
    let resolved = sites.iter().filter(|&&(_, target)| target != 0).count();
    for (name, target) in &sites {
        if *target == 0 {
            println!("{:>18}  {}", "unresolved", name);
        } else {
            println!("{:#018x}  {}", target, name);
        }
    }
    eprintln!(
        "{}/{} sites resolved via {}",
        resolved,
        sites.len(),
        ntrs::transport()
    );
    Ok(())
}

fn main() {
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Hash {
            name,
            case_sensitive,
            wide,
        } => hash_name(name, case_sensitive, wide),
        Commands::Exports { input } => list_exports(input),
        Commands::Resolve {
            input,
            name,
            ordinal,
            base,
        } => resolve_export(input, name, ordinal, base),
        Commands::Syscalls { input, all } => list_syscalls(input, all),
        #[cfg(windows)]
        Commands::Modules => list_modules(),
        #[cfg(windows)]
        Commands::Sites => list_sites(),
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}
