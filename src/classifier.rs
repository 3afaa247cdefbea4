use crate::models::{CategoryStats, TxCategory};

type SignatureTable = &'static [(&'static str, &'static [&'static str])];

// Lookup order within a table is declaration order; a selector listed under
// several subtypes resolves to the first one.
const DEFI: SignatureTable = &[
    (
        "swap",
        &[
            "0xa9059cbb",
            "0x23b872dd",
            "0x095ea7b3",
            "0x7ff36ab5",
            "0x38ed1739",
            "0x2232ea43",
            "0x18cbafe5",
            "0x3593564c",
            "0x2213bc0b",
            "0xd555f90d",
            "0x7e865aa4",
            "0x344933be",
            "0x620dcbd1",
        ],
    ),
    (
        "stake",
        &[
            "0xa694fc3a",
            "0x2e1a7d4d",
            "0x3ccfd60b",
            "0xb6b55f25",
            "0x3a4b66f1",
        ],
    ),
    (
        "AddLiquidity",
        &[
            "0xe8e33700",
            "0xbaa2abde",
            "0x4515cef3",
            "0x02751cec",
            "0xf305d719",
        ],
    ),
    (
        "Lend",
        &[
            "0x1249c58b",
            "0xa415bcad",
            "0x69328dec",
            "0x573ade81",
            "0xe8bbf5d7",
        ],
    ),
    ("Borrow", &["0xe8bbf5d7", "0x4b8a3529"]),
    ("Deposit", &["0xe8bbf5d7", "0x47e7ef24"]),
];

const NFT: SignatureTable = &[
    (
        "MintNFT",
        &[
            "0x40c10f19",
            "0xa0712d68",
            "0x6a627842",
            "0x42842e0e",
            "0x1ff7712f",
            "0x1249c58b",
        ],
    ),
    (
        "TransferNFT",
        &["0x23b872dd", "0x42842e0e", "0xb88d4fde", "0xa22cb465"],
    ),
    (
        "SellNFT",
        &["0x96b5a755", "0xfb0f3ee1", "0xab834bab", "0xe7acab24"],
    ),
];

const CONTRACT: SignatureTable = &[("deploy", &["0xcc6212f2", "0x60a06040"])];

const TABLES: [(TxCategory, SignatureTable); 3] = [
    (TxCategory::Defi, DEFI),
    (TxCategory::Nft, NFT),
    (TxCategory::Contract, CONTRACT),
];

/// `0x` plus four selector bytes.
const SELECTOR_LEN: usize = 10;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    pub category: TxCategory,
    pub subtype: String,
}

impl Classification {
    fn other() -> Self {
        Self {
            category: TxCategory::Other,
            subtype: "OTHER".to_string(),
        }
    }
}

pub fn classify(input_data: &str) -> Classification {
    let Some(prefix) = input_data.get(..SELECTOR_LEN) else {
        return Classification::other();
    };
    let selector = prefix.to_ascii_lowercase();

    for (category, table) in TABLES {
        for (subtype, selectors) in table {
            if selectors.contains(&selector.as_str()) {
                return Classification {
                    category,
                    subtype: (*subtype).to_string(),
                };
            }
        }
    }

    Classification::other()
}

/// Folds one block's calldata into display buckets. Contract deployments are
/// split out from other contract calls.
pub fn category_stats<'a, I>(inputs: I) -> CategoryStats
where
    I: IntoIterator<Item = &'a str>,
{
    let mut stats = CategoryStats::default();
    for input in inputs {
        let Classification { category, subtype } = classify(input);
        match category {
            TxCategory::Defi => stats.defi += 1,
            TxCategory::Nft => stats.nft += 1,
            TxCategory::Contract if subtype == "deploy" => stats.contract_deploy += 1,
            TxCategory::Contract => stats.contract_call += 1,
            TxCategory::Transfer => stats.transfer += 1,
            TxCategory::Other => stats.other += 1,
        }
    }
    stats
}
