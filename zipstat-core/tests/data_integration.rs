//! Integration tests for the pure stages using canned Census responses.

use zipstat_core::data::census::parse_table;
use zipstat_core::{
    select_top_k, MasterBuilder, OrderingDirection, SelectError, SourceTable,
};

const POPULATION_BODY: &str = r#"[
    ["NAME","B01003_001E","B01003_001M","zip code tabulation area"],
    ["ZCTA5 00601","10","1","00601"],
    ["ZCTA5 00602","20","1","00602"],
    ["ZCTA5 00603",null,null,"00603"]
]"#;

const HOUSING_BODY: &str = r#"[
    ["NAME","B00002_001E","zip code tabulation area"],
    ["ZCTA5 00601","5","00601"],
    ["ZCTA5 00603","15","00603"]
]"#;

fn source(table_id: &str, column: &str, body: &str) -> SourceTable {
    SourceTable::new(table_id, column, parse_table(table_id, body).unwrap())
}

#[test]
fn census_bodies_build_an_imputed_master_table() {
    let population = source("B01003", "population", POPULATION_BODY);
    let housing = source("B00002", "housing_units", HOUSING_BODY);

    let master = MasterBuilder::build(&population, &housing).unwrap();
    let rows = master.rows().unwrap();

    assert_eq!(rows.len(), 3);
    // 00603 has no population estimate: mean of 10 and 20.
    assert_eq!(rows[2].population, 15);
    // 00602 has no housing row: mean of 5 and 15.
    assert_eq!(rows[1].housing_units, 10);
    assert!(master.duplicates.is_empty());
}

#[test]
fn indicator_body_ranks_with_ties() {
    let body = r#"[
        ["NAME","C27016_001E","zip code tabulation area"],
        ["a","3","00601"],
        ["b","9","00602"],
        ["c","9","00603"],
        ["d","1","00604"]
    ]"#;
    let table = source("C27016", "insurance_income_poverty_ratio", body);

    let subset = select_top_k(&table, 1, OrderingDirection::Descending).unwrap();
    let zips: Vec<String> = subset.rows().unwrap().into_iter().map(|r| r.zip_code).collect();

    assert_eq!(zips, vec!["00602", "00603"]);
    assert_eq!(subset.tie_overflow(), 1);
}

#[test]
fn header_only_body_cannot_be_ranked() {
    let body = r#"[["NAME","B05010_001E","zip code tabulation area"]]"#;
    let table = source("B05010", "income_poverty_ratio", body);

    assert!(table.is_empty());
    assert!(matches!(
        select_top_k(&table, 10, OrderingDirection::Ascending),
        Err(SelectError::EmptyTable { .. })
    ));
}
