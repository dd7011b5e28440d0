//! Digital Storefront CLI - Database migrations and catalogue management.
//!
//! # Usage
//!
//! ```bash
//! # Run storefront database migrations
//! ds-cli migrate
//!
//! # Register a product whose file is already in product storage
//! ds-cli product add -n "Field Guide" -d "A guide" -p 1999 -f products/guide.pdf -i /products/guide.png
//!
//! # Create a 20% code for every product, usable 100 times
//! ds-cli discount create -c LAUNCH20 -k percentage -a 20 --all-products -l 100
//!
//! # List discount codes with their status
//! ds-cli discount list
//! ```

#![cfg_attr(not(test), forbid(unsafe_code))]

use clap::{Parser, Subcommand, ValueEnum};

use digital_storefront_core::DiscountKind;

mod commands;

#[derive(Parser)]
#[command(name = "ds-cli")]
#[command(author, version, about = "Digital Storefront CLI tools")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run database migrations
    Migrate,
    /// Manage products
    Product {
        #[command(subcommand)]
        action: ProductAction,
    },
    /// Manage discount codes
    Discount {
        #[command(subcommand)]
        action: DiscountAction,
    },
}

#[derive(Subcommand)]
enum ProductAction {
    /// Register a new product
    Add {
        #[arg(short, long)]
        name: String,

        #[arg(short, long, default_value = "")]
        description: String,

        /// Price in cents
        #[arg(short, long)]
        price: i64,

        /// File location relative to the storage root
        #[arg(short, long)]
        file: String,

        /// Public image path
        #[arg(short, long, default_value = "")]
        image: String,

        /// Register without making it purchasable
        #[arg(long)]
        unavailable: bool,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum KindArg {
    Percentage,
    Fixed,
}

impl From<KindArg> for DiscountKind {
    fn from(kind: KindArg) -> Self {
        match kind {
            KindArg::Percentage => Self::Percentage,
            KindArg::Fixed => Self::Fixed,
        }
    }
}

#[derive(Subcommand)]
enum DiscountAction {
    /// Create a discount code
    Create {
        #[arg(short, long)]
        code: String,

        #[arg(short, long, value_enum)]
        kind: KindArg,

        /// Percent off, or whole currency units off
        #[arg(short, long)]
        amount: i64,

        #[arg(long)]
        all_products: bool,

        /// Product the code applies to (repeatable)
        #[arg(long = "product")]
        products: Vec<String>,

        /// Expiry as an RFC 3339 timestamp
        #[arg(short, long)]
        expires_at: Option<String>,

        /// Maximum number of uses
        #[arg(short, long)]
        limit: Option<i64>,
    },
    /// List discount codes
    List,
}

#[tokio::main]
async fn main() {
    // Initialize tracing
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();

    let result: Result<(), Box<dyn std::error::Error>> = run(cli).await;

    if let Err(e) = result {
        tracing::error!("Command failed: {e}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    match cli.command {
        Commands::Migrate => commands::migrate::run().await?,
        Commands::Product { action } => match action {
            ProductAction::Add {
                name,
                description,
                price,
                file,
                image,
                unavailable,
            } => {
                commands::product::add(commands::product::ProductArgs {
                    name,
                    description,
                    price,
                    file_path: file,
                    image_path: image,
                    available: !unavailable,
                })
                .await?;
            }
        },
        Commands::Discount { action } => match action {
            DiscountAction::Create {
                code,
                kind,
                amount,
                all_products,
                products,
                expires_at,
                limit,
            } => {
                commands::discount::create(commands::discount::DiscountArgs {
                    code,
                    kind: kind.into(),
                    amount,
                    all_products,
                    products,
                    expires_at,
                    limit,
                })
                .await?;
            }
            DiscountAction::List => commands::discount::list().await?,
        },
    }
    Ok(())
}
