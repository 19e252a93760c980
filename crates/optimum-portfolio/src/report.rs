//! Tabular view of the portfolio.

use crate::error::Result;
use crate::holdings::Holdings;
use optimum_model::Model;
use polars::prelude::*;

/// Build the holdings table
///
/// Always has `ticker`, `shares`, `lower` and `upper`. Prices add
/// `close ($)`, `value ($)`, `value (%)`, `lower ($)` and `upper ($)`; a
/// model adds `return (%)` and `std (%)`. Percent columns are fractions.
pub fn holdings_frame(holdings: &Holdings, model: Option<&Model>) -> Result<DataFrame> {
    let mut columns: Vec<Column> = vec![
        Series::new("ticker".into(), holdings.tickers().to_vec()).into(),
        Series::new("shares".into(), holdings.shares().to_vec()).into(),
        Series::new("lower".into(), holdings.lower().to_vec()).into(),
        Series::new("upper".into(), holdings.upper().to_vec()).into(),
    ];

    if let Some(prices) = holdings.prices() {
        columns.push(Series::new("close ($)".into(), prices.close.to_vec()).into());
        columns.push(Series::new("value ($)".into(), prices.value.to_vec()).into());
        columns.push(Series::new("value (%)".into(), prices.weight.to_vec()).into());
    }

    if let Some(model) = model {
        columns.push(Series::new("return (%)".into(), model.r().to_vec()).into());
        columns.push(Series::new("std (%)".into(), model.std()?.to_vec()).into());
    }

    if let Some(prices) = holdings.prices() {
        let lower = holdings.lower() * &prices.close;
        let upper = holdings.upper() * &prices.close;
        columns.push(Series::new("lower ($)".into(), lower.to_vec()).into());
        columns.push(Series::new("upper ($)".into(), upper.to_vec()).into());
    }

    Ok(DataFrame::new(columns)?)
}
