//! Declared-type families used by join validation.

/// Coarse family of a declared column type.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TypeFamily {
    /// Undeclared or unrecognised.
    Unknown,
    /// Booleans.
    Boolean,
    /// Whole numbers.
    Integer,
    /// Fractional and fixed-point numbers.
    Numeric,
    /// Character data.
    String,
    /// Byte strings.
    Binary,
    /// Dates, times, and timestamps.
    Temporal,
    /// JSON documents.
    Json,
    /// UUIDs.
    Uuid,
}

impl TypeFamily {
    /// Whether two columns of these families may be joined on equality.
    /// Unknown families never match.
    pub fn joinable(self, other: Self) -> bool {
        self == other && self != Self::Unknown
    }
}

/// Map a declared type such as `VARCHAR(80)` or `bigint unsigned` to its
/// family. Names outside the known list fall back to `SQLite` affinity rules.
pub fn type_family(data_type: &str) -> TypeFamily {
    let normalized = data_type
        .trim()
        .trim_matches(|c| c == '"' || c == '\'' || c == '`')
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase();
    let base = normalized.split('(').next().unwrap_or("").trim();
    let base = base.strip_prefix("unsigned ").unwrap_or(base);
    let base = base.strip_suffix(" unsigned").unwrap_or(base);

    match base {
        "" | "any" => TypeFamily::Unknown,
        "bool" | "boolean" => TypeFamily::Boolean,
        "tinyint" | "smallint" | "int2" | "int" | "integer" | "int4" | "int8" | "bigint"
        | "mediumint" | "serial" | "smallserial" | "bigserial" => TypeFamily::Integer,
        "numeric" | "decimal" | "dec" | "number" | "float" | "float4" | "float8" | "real"
        | "double" | "double precision" | "money" => TypeFamily::Numeric,
        "char" | "character" | "varchar" | "character varying" | "nchar" | "nvarchar"
        | "text" | "string" | "clob" | "citext" => TypeFamily::String,
        "binary" | "varbinary" | "blob" | "bytea" => TypeFamily::Binary,
        "date" | "time" | "timestamp" | "timestamptz" | "datetime" | "timestamp with time zone"
        | "timestamp without time zone" => TypeFamily::Temporal,
        "json" | "jsonb" => TypeFamily::Json,
        "uuid" => TypeFamily::Uuid,
        other => affinity(other),
    }
}

/// `SQLite` column affinity by substring.
fn affinity(name: &str) -> TypeFamily {
    if name.contains("int") {
        TypeFamily::Integer
    } else if name.contains("char") || name.contains("clob") || name.contains("text") {
        TypeFamily::String
    } else if name.contains("blob") {
        TypeFamily::Binary
    } else if name.contains("real") || name.contains("floa") || name.contains("doub") {
        TypeFamily::Numeric
    } else {
        TypeFamily::Unknown
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
