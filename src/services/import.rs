//! Statement import
//!
//! Parsers turn statement files into [`UnifiedTransaction`]s without
//! classifying or dropping anything; the importer picks the first parser that
//! accepts a file and runs the result through the rule engine.

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use chrono::{DateTime, Local, NaiveDate, NaiveDateTime, TimeZone};
use csv::{ReaderBuilder, StringRecord};
use tracing::{debug, info};

use super::ledger_file::Workspace;
use super::rule_engine::{Outcome, RuleEngine};
use crate::error::{CashflowError, CashflowResult};
use crate::models::{FinalTransaction, Money, RuleConfig, UnifiedTransaction};

/// A statement format
pub trait BillParser {
    /// Short name used in logs and reports
    fn name(&self) -> &str;

    /// Whether this parser accepts the file (by extension, header, ...)
    fn supports(&self, path: &Path) -> bool;

    /// Parse a whole statement
    fn parse(&self, reader: &mut dyn Read) -> CashflowResult<Vec<UnifiedTransaction>>;

    /// Parse a statement file
    fn parse_path(&self, path: &Path) -> CashflowResult<Vec<UnifiedTransaction>> {
        let file = File::open(path).map_err(|e| {
            CashflowError::Import(format!("Failed to open {}: {}", path.display(), e))
        })?;
        self.parse(&mut BufReader::new(file))
    }
}

/// Where a field lives in a CSV row
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Column {
    /// Zero-based position
    Index(usize),
    /// Header cell text (trimmed, exact)
    Header(String),
}

impl Column {
    pub fn header(name: impl Into<String>) -> Self {
        Column::Header(name.into())
    }
}

/// Column mapping configuration for CSV statements
#[derive(Debug, Clone)]
pub struct ColumnMapping {
    /// Transaction time
    pub time_column: Column,
    /// Amount; signed unless a direction column is given
    pub amount_column: Column,
    /// Income/expense marker column; the amount is then taken as unsigned
    pub direction_column: Option<Column>,
    pub payee_column: Option<Column>,
    pub item_column: Option<Column>,
    pub note_column: Option<Column>,
    /// Time format (chrono strftime); date-only fallbacks are tried after it
    pub time_format: String,
    /// Rows before the first row whose first cell equals this text are skipped
    pub header_marker: Option<String>,
    /// Whether the first (remaining) row is a header
    pub has_header: bool,
    pub delimiter: u8,
    /// Direction cell substrings meaning income
    pub income_markers: Vec<String>,
    /// Direction cell substrings meaning expense
    pub expense_markers: Vec<String>,
    /// Negate amounts (some banks report purchases as positive)
    pub invert_amounts: bool,
    /// Lower-case file extensions the parser accepts
    pub extensions: Vec<String>,
}

impl Default for ColumnMapping {
    fn default() -> Self {
        Self {
            time_column: Column::Index(0),
            amount_column: Column::Index(1),
            direction_column: None,
            payee_column: Some(Column::Index(2)),
            item_column: None,
            note_column: None,
            time_format: "%Y-%m-%d %H:%M:%S".to_string(),
            header_marker: None,
            has_header: true,
            delimiter: b',',
            income_markers: Vec::new(),
            expense_markers: Vec::new(),
            invert_amounts: false,
            extensions: vec!["csv".to_string()],
        }
    }
}

impl ColumnMapping {
    pub fn new() -> Self {
        Self::default()
    }

    /// WeChat Pay CSV export
    ///
    /// A free-text preamble precedes the header row starting with `交易时间`;
    /// amounts are unsigned with the direction in `收/支`.
    pub fn wechat() -> Self {
        Self {
            time_column: Column::header("交易时间"),
            amount_column: Column::header("金额(元)"),
            direction_column: Some(Column::header("收/支")),
            payee_column: Some(Column::header("交易对方")),
            item_column: Some(Column::header("商品")),
            note_column: Some(Column::header("备注")),
            header_marker: Some("交易时间".to_string()),
            income_markers: vec!["收".to_string(), "入".to_string()],
            expense_markers: vec!["支".to_string(), "出".to_string()],
            extensions: vec!["csv".to_string(), "txt".to_string()],
            ..Self::default()
        }
    }

    /// Set the time format
    pub fn with_time_format(mut self, format: &str) -> Self {
        self.time_format = format.to_string();
        self
    }

    /// Set whether first row is header
    pub fn with_header(mut self, has_header: bool) -> Self {
        self.has_header = has_header;
        self
    }

    /// Set the delimiter
    pub fn with_delimiter(mut self, delimiter: u8) -> Self {
        self.delimiter = delimiter;
        self
    }
}

/// Column positions resolved against a header row
#[derive(Debug)]
struct ResolvedColumns {
    time: usize,
    amount: usize,
    direction: Option<usize>,
    payee: Option<usize>,
    item: Option<usize>,
    note: Option<usize>,
}

/// Generic column-mapped CSV statement parser
#[derive(Debug, Clone)]
pub struct CsvBillParser {
    name: String,
    mapping: ColumnMapping,
}

impl CsvBillParser {
    pub fn new(name: impl Into<String>, mapping: ColumnMapping) -> Self {
        Self {
            name: name.into(),
            mapping,
        }
    }

    pub fn wechat() -> Self {
        Self::new("wechat", ColumnMapping::wechat())
    }

    pub fn mapping(&self) -> &ColumnMapping {
        &self.mapping
    }

    fn resolve(&self, header: Option<&StringRecord>) -> CashflowResult<ResolvedColumns> {
        let positions: HashMap<&str, usize> = header
            .map(|h| h.iter().enumerate().map(|(i, cell)| (cell.trim(), i)).collect())
            .unwrap_or_default();

        let find = |column: &Column| -> CashflowResult<usize> {
            match column {
                Column::Index(i) => Ok(*i),
                Column::Header(name) => positions.get(name.as_str()).copied().ok_or_else(|| {
                    CashflowError::Import(format!("{}: column '{}' not found", self.name, name))
                }),
            }
        };
        // Optional columns that are missing from the header read as blank
        let find_optional = |column: &Option<Column>| column.as_ref().and_then(|c| find(c).ok());

        Ok(ResolvedColumns {
            time: find(&self.mapping.time_column)?,
            amount: find(&self.mapping.amount_column)?,
            direction: match &self.mapping.direction_column {
                Some(column) => Some(find(column)?),
                None => None,
            },
            payee: find_optional(&self.mapping.payee_column),
            item: find_optional(&self.mapping.item_column),
            note: find_optional(&self.mapping.note_column),
        })
    }

    fn parse_record(
        &self,
        record: &StringRecord,
        columns: &ResolvedColumns,
        line: u64,
    ) -> CashflowResult<Option<UnifiedTransaction>> {
        let cell = |i: Option<usize>| {
            i.and_then(|i| record.get(i))
                .map(|s| s.trim().to_string())
                .unwrap_or_default()
        };

        let time = cell(Some(columns.time));
        if time.is_empty() || time.starts_with("---") {
            return Ok(None);
        }
        let row_error = |msg: String| CashflowError::Import(format!("line {}: {}", line, msg));

        let timestamp_ms = self.parse_time(&time).map_err(row_error)?;
        let amount = self
            .parse_amount(&cell(Some(columns.amount)), &cell(columns.direction))
            .map_err(row_error)?;

        Ok(Some(UnifiedTransaction::new(
            timestamp_ms,
            amount,
            cell(columns.payee),
            cell(columns.item),
            cell(columns.note),
        )))
    }

    /// Parse a local time into epoch milliseconds
    fn parse_time(&self, s: &str) -> Result<i64, String> {
        let naive = NaiveDateTime::parse_from_str(s, &self.mapping.time_format)
            .ok()
            .or_else(|| {
                ["%Y-%m-%d %H:%M", "%Y/%m/%d %H:%M:%S", "%Y/%m/%d %H:%M"]
                    .iter()
                    .find_map(|f| NaiveDateTime::parse_from_str(s, f).ok())
            })
            .or_else(|| {
                ["%Y-%m-%d", "%Y/%m/%d", "%m/%d/%Y"]
                    .iter()
                    .find_map(|f| NaiveDate::parse_from_str(s, f).ok())
                    .and_then(|d| d.and_hms_opt(0, 0, 0))
            })
            .ok_or_else(|| format!("could not parse time '{}'", s))?;

        local_millis(naive).ok_or_else(|| format!("time '{}' does not exist locally", s))
    }

    /// Parse an amount, applying the direction marker when there is one
    fn parse_amount(&self, raw: &str, direction: &str) -> Result<Money, String> {
        let cleaned: String = raw
            .chars()
            .filter(|c| !matches!(c, '¥' | '￥' | '$' | ',') && !c.is_whitespace())
            .collect();
        let amount =
            Money::parse(&cleaned).map_err(|e| format!("could not parse amount '{}': {}", raw, e))?;

        let amount = if self.mapping.direction_column.is_some() {
            let has = |markers: &[String]| markers.iter().any(|m| direction.contains(m.as_str()));
            let magnitude = Money::from_minor(amount.minor().abs());
            // Income markers win over expense markers; unmarked rows count as income
            if has(self.mapping.income_markers.as_slice())
                || !has(self.mapping.expense_markers.as_slice())
            {
                magnitude
            } else {
                -magnitude
            }
        } else {
            amount
        };

        Ok(if self.mapping.invert_amounts {
            -amount
        } else {
            amount
        })
    }
}

impl BillParser for CsvBillParser {
    fn name(&self) -> &str {
        &self.name
    }

    fn supports(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .map_or(false, |e| self.mapping.extensions.iter().any(|x| *x == e))
    }

    fn parse(&self, reader: &mut dyn Read) -> CashflowResult<Vec<UnifiedTransaction>> {
        let mut text = String::new();
        reader
            .read_to_string(&mut text)
            .map_err(|e| CashflowError::Import(format!("{}: {}", self.name, e)))?;
        let text = text.strip_prefix('\u{feff}').unwrap_or(&text);

        let mut csv = ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .delimiter(self.mapping.delimiter)
            .from_reader(text.as_bytes());

        let mut records = csv.records();
        if let Some(marker) = &self.mapping.header_marker {
            while let Some(record) = records.next() {
                let record = record?;
                if record.get(0).map(str::trim) == Some(marker.as_str()) {
                    let columns = self.resolve(Some(&record))?;
                    return self.parse_rows(&mut records, &columns);
                }
            }
            return Err(CashflowError::Import(format!(
                "{}: header row '{}' not found",
                self.name, marker
            )));
        }

        let header = if self.mapping.has_header {
            records.next().transpose()?
        } else {
            None
        };
        let columns = self.resolve(header.as_ref())?;
        self.parse_rows(&mut records, &columns)
    }
}

impl CsvBillParser {
    fn parse_rows<R: Read>(
        &self,
        records: &mut csv::StringRecordsIter<'_, R>,
        columns: &ResolvedColumns,
    ) -> CashflowResult<Vec<UnifiedTransaction>> {
        let mut out = Vec::new();
        for record in records {
            let record = record?;
            if record.iter().all(|cell| cell.trim().is_empty()) {
                continue;
            }
            let line = record.position().map_or(0, |p| p.line());
            if let Some(txn) = self.parse_record(&record, columns, line)? {
                out.push(txn);
            }
        }
        debug!(parser = %self.name, rows = out.len(), "parsed statement");
        Ok(out)
    }
}

/// Local wall-clock time to epoch milliseconds; ambiguous times take the earlier instant
fn local_millis(naive: NaiveDateTime) -> Option<i64> {
    Local
        .from_local_datetime(&naive)
        .earliest()
        .map(|dt: DateTime<Local>| dt.timestamp_millis())
}

/// Epoch milliseconds of local midnight on the day containing `timestamp_ms`
pub fn local_start_of_day(timestamp_ms: i64) -> Option<i64> {
    let local = Local.timestamp_millis_opt(timestamp_ms).single()?;
    local_millis(local.date_naive().and_hms_opt(0, 0, 0)?)
}

/// Keep only transactions on or after the day of the latest existing entry
///
/// With no existing entries every transaction is kept.
pub fn filter_from_last_date(
    finals: Vec<FinalTransaction>,
    existing_max_ts: Option<i64>,
) -> Vec<FinalTransaction> {
    match existing_max_ts.and_then(local_start_of_day) {
        Some(cutoff) => finals
            .into_iter()
            .filter(|f| f.timestamp_ms >= cutoff)
            .collect(),
        None => finals,
    }
}

/// What an import produced
#[derive(Debug, Clone, Default)]
pub struct ImportReport {
    /// Parser that read the file
    pub parser: String,
    /// Rows the parser produced
    pub parsed: usize,
    /// Rows a `drop` rule discarded
    pub dropped: usize,
    /// Rows left out because they predate the last existing day
    pub skipped_before_last_date: usize,
    /// Rows only the defaults classified
    pub unmatched: usize,
    /// Classified rows, in statement order
    pub transactions: Vec<FinalTransaction>,
}

impl ImportReport {
    pub fn kept(&self) -> usize {
        self.transactions.len()
    }
}

/// Ordered registry of statement parsers
#[derive(Default)]
pub struct BillImporter {
    parsers: Vec<Box<dyn BillParser>>,
}

impl BillImporter {
    /// Importer with no parsers
    pub fn new() -> Self {
        Self::default()
    }

    /// Importer with the built-in parsers
    pub fn with_builtin_parsers() -> Self {
        let mut importer = Self::new();
        importer.register(CsvBillParser::wechat());
        importer
    }

    /// Add a parser after those already registered
    pub fn register<P: BillParser + 'static>(&mut self, parser: P) -> &mut Self {
        self.parsers.push(Box::new(parser));
        self
    }

    /// First parser that supports `path`
    pub fn parser_for(&self, path: &Path) -> Option<&dyn BillParser> {
        self.parsers
            .iter()
            .find(|p| p.supports(path))
            .map(|p| p.as_ref())
    }

    /// Parse and classify a statement file
    pub fn import_file<P: AsRef<Path>>(
        &self,
        path: P,
        config: &RuleConfig,
    ) -> CashflowResult<ImportReport> {
        let path = path.as_ref();
        let parser = self.parser_for(path).ok_or_else(|| {
            CashflowError::Import(format!("no parser supports {}", path.display()))
        })?;

        // Compile before parsing so a broken rule file fails fast
        let engine = RuleEngine::compile(config)?;
        let raw = parser.parse_path(path)?;

        let mut report = ImportReport {
            parser: parser.name().to_string(),
            parsed: raw.len(),
            ..ImportReport::default()
        };
        for txn in &raw {
            match engine.evaluate(txn) {
                Outcome::Dropped { .. } => report.dropped += 1,
                Outcome::Kept { rule, transaction } => {
                    if rule.is_none() {
                        report.unmatched += 1;
                    }
                    report.transactions.push(transaction);
                }
            }
        }

        info!(
            path = %path.display(),
            parser = %report.parser,
            parsed = report.parsed,
            dropped = report.dropped,
            kept = report.kept(),
            "imported statement"
        );
        Ok(report)
    }

    /// Import a statement into a workspace
    ///
    /// Honors `only_append_from_last_date` from the rule defaults, then appends
    /// the remaining rows.
    pub fn import_into<P: AsRef<Path>>(
        &self,
        path: P,
        config: &RuleConfig,
        workspace: &mut Workspace,
    ) -> CashflowResult<ImportReport> {
        let mut report = self.import_file(path, config)?;

        if config.defaults.only_append_from_last_date {
            let before = report.transactions.len();
            report.transactions = filter_from_last_date(
                std::mem::take(&mut report.transactions),
                workspace.latest_timestamp(),
            );
            report.skipped_before_last_date = before - report.transactions.len();
        }

        workspace.append_finals(report.transactions.clone())?;
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::rule::{RuleDef, RuleDefaults, TextMatch, Then, When};
    use crate::models::LedgerEntry;
    use std::io::Cursor;
    use tempfile::TempDir;

    const WECHAT: &str = "\u{feff}微信支付账单明细,,,,,,,,
微信昵称：[someone],,,,,,,,
----------------------微信支付账单明细列表--------------------,,,,,,,,
交易时间,交易类型,交易对方,商品,收/支,金额(元),支付方式,当前状态,备注
2025-01-03 12:30:00,商户消费,Noodle House,Beef noodles,支出,¥25.00,零钱,支付成功,/
2025-01-04 09:00:00,转账,Alice,,收入,\"¥1,500.00\",零钱,已收钱,
---,,,,,,,,
2025-01-05 08:15:00,商户消费,Coffee Bar,Latte,支出,¥12.50,零钱,支付成功,
";

    fn local_ms(s: &str) -> i64 {
        let naive = NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S").unwrap();
        local_millis(naive).unwrap()
    }

    fn parse(parser: &CsvBillParser, text: &str) -> CashflowResult<Vec<UnifiedTransaction>> {
        parser.parse(&mut Cursor::new(text.as_bytes()))
    }

    #[test]
    fn test_wechat_export() {
        let txns = parse(&CsvBillParser::wechat(), WECHAT).unwrap();
        assert_eq!(txns.len(), 3);

        assert_eq!(txns[0].timestamp_ms, local_ms("2025-01-03 12:30:00"));
        assert_eq!(txns[0].amount.minor(), -2500);
        assert_eq!(txns[0].payee, "Noodle House");
        assert_eq!(txns[0].item, "Beef noodles");
        assert_eq!(txns[0].note, "/");

        assert_eq!(txns[1].amount.minor(), 150_000);
        assert_eq!(txns[1].item, "");
        assert_eq!(txns[2].amount.minor(), -1250);
    }

    #[test]
    fn test_missing_header_row() {
        let err = parse(&CsvBillParser::wechat(), "a,b\n1,2\n").unwrap_err();
        assert!(matches!(err, CashflowError::Import(_)));
        assert!(err.to_string().contains("交易时间"));
    }

    #[test]
    fn test_plain_signed_csv() {
        let parser = CsvBillParser::new(
            "bank",
            ColumnMapping {
                item_column: Some(Column::Index(3)),
                ..ColumnMapping::new()
            }
            .with_time_format("%Y-%m-%d"),
        );
        let txns = parse(
            &parser,
            "date,amount,payee,memo\n2025-01-02,-12.30,Shop,bread\n\n2025-01-03,\"1,000\",Boss,\n",
        )
        .unwrap();
        assert_eq!(txns.len(), 2);
        assert_eq!(txns[0].amount.minor(), -1230);
        assert_eq!(txns[0].item, "bread");
        assert_eq!(txns[0].timestamp_ms, local_ms("2025-01-02 00:00:00"));
        assert_eq!(txns[1].amount.minor(), 100_000);
    }

    #[test]
    fn test_bad_amount_names_line() {
        let parser = CsvBillParser::new("bank", ColumnMapping::new());
        let err = parse(&parser, "t,a,p\n2025-01-02 10:00:00,abc,Shop\n").unwrap_err();
        assert!(err.to_string().contains("line 2"), "{}", err);
    }

    #[test]
    fn test_supports_by_extension() {
        let parser = CsvBillParser::wechat();
        assert!(parser.supports(Path::new("bill.CSV")));
        assert!(parser.supports(Path::new("bill.txt")));
        assert!(!parser.supports(Path::new("bill.xlsx")));
        assert!(!parser.supports(Path::new("bill")));
    }

    #[test]
    fn test_filter_from_last_date() {
        let last = local_ms("2025-01-04 18:00:00");
        let finals: Vec<_> = [
            "2025-01-03 23:59:59",
            "2025-01-04 00:00:00",
            "2025-01-05 08:00:00",
        ]
        .iter()
        .map(|s| FinalTransaction {
            timestamp_ms: local_ms(s),
            amount: Money::zero(),
            category: "c".into(),
            sub_category: "s".into(),
            note: s.to_string(),
        })
        .collect();

        let kept = filter_from_last_date(finals.clone(), Some(last));
        let notes: Vec<_> = kept.iter().map(|f| f.note.as_str()).collect();
        assert_eq!(notes, vec!["2025-01-04 00:00:00", "2025-01-05 08:00:00"]);

        assert_eq!(filter_from_last_date(finals, None).len(), 3);
    }

    #[test]
    fn test_import_into_workspace() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("wechat.csv");
        std::fs::write(&path, WECHAT).unwrap();

        let config = RuleConfig::with_defaults(RuleDefaults {
            only_append_from_last_date: true,
            ..RuleDefaults::new("Other", "Misc")
        })
        .rule(
            RuleDef::named("transfers")
                .when(When::always().payee(TextMatch::equals("alice")))
                .then(Then::discard()),
        )
        .rule(
            RuleDef::named("coffee")
                .when(When::always().item(TextMatch::contains("latte")))
                .then(Then::classify("Drinks", "Coffee")),
        );

        let mut ws = Workspace::new(2025, 1).unwrap();
        ws.push_entry(LedgerEntry::new(
            local_ms("2025-01-04 20:00:00"),
            Money::from_minor(-100),
            "Food",
            "Meal",
            "",
        ))
        .unwrap();

        let importer = BillImporter::with_builtin_parsers();
        let report = importer.import_into(&path, &config, &mut ws).unwrap();

        assert_eq!(report.parser, "wechat");
        assert_eq!(report.parsed, 3);
        assert_eq!(report.dropped, 1);
        assert_eq!(report.skipped_before_last_date, 1);
        assert_eq!(report.kept(), 1);
        assert_eq!(ws.len(), 2);
        assert_eq!(ws.entries()[1].category, "Drinks");
        assert_eq!(ws.entries()[1].note, "");
    }

    #[test]
    fn test_import_without_parser() {
        let importer = BillImporter::new();
        let err = importer
            .import_file("statement.pdf", &RuleConfig::default())
            .unwrap_err();
        assert!(matches!(err, CashflowError::Import(_)));
    }

    #[test]
    fn test_first_supporting_parser_wins() {
        let mut importer = BillImporter::new();
        importer
            .register(CsvBillParser::new("first", ColumnMapping::new()))
            .register(CsvBillParser::wechat());
        assert_eq!(
            importer.parser_for(Path::new("a.csv")).unwrap().name(),
            "first"
        );
        assert_eq!(importer.parser_for(Path::new("a.txt")).unwrap().name(), "wechat");
    }
}
