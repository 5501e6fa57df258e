use arrow::record_batch::RecordBatch;
use common::Result;
use datafusion::functions_aggregate::expr_fn::count;
use datafusion::prelude::{col, lit, DataFrame, SessionContext};

pub const COUNT_COLUMN: &str = "brewery_count";

/// A table-in, table-out step expressed on DataFusion frames.
pub trait RelationalStep: Send + Sync {
    fn name(&self) -> &str;
    fn apply(&self, input: DataFrame) -> Result<DataFrame>;
}

/// `SELECT keys, COUNT(*) AS brewery_count GROUP BY keys`, ordered by count
/// descending then keys ascending.
#[derive(Debug, Clone)]
pub struct GroupCount {
    keys: Vec<String>,
}

impl GroupCount {
    pub fn new<S: AsRef<str>>(keys: &[S]) -> Self {
        Self {
            keys: keys.iter().map(|k| k.as_ref().to_string()).collect(),
        }
    }

    pub fn keys(&self) -> &[String] {
        &self.keys
    }
}

impl RelationalStep for GroupCount {
    fn name(&self) -> &str {
        "group_count"
    }

    fn apply(&self, input: DataFrame) -> Result<DataFrame> {
        let group_exprs = self.keys.iter().map(|k| col(k.as_str())).collect();
        let grouped = input.aggregate(group_exprs, vec![count(lit(1)).alias(COUNT_COLUMN)])?;

        let mut order = vec![col(COUNT_COLUMN).sort(false, false)];
        order.extend(self.keys.iter().map(|k| col(k.as_str()).sort(true, false)));
        Ok(grouped.sort(order)?)
    }
}

/// Runs `step` over in-memory batches and collects the result.
pub async fn run_step(
    ctx: &SessionContext,
    step: &dyn RelationalStep,
    batches: Vec<RecordBatch>,
) -> Result<Vec<RecordBatch>> {
    let input = ctx.read_batches(batches)?;
    Ok(step.apply(input)?.collect().await?)
}
