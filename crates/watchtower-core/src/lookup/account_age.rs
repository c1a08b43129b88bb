//! Account-age estimation from numeric profile ids.
//!
//! Ids are assigned sequentially, so the id alone dates the account to a
//! year. The breakpoints are the highest observed id per calendar year.

use chrono::Datelike;

const ID_YEAR_BREAKPOINTS: &[(u64, i32)] = &[
    (1_278_889, 2010),
    (17_750_000, 2011),
    (279_760_000, 2012),
    (900_990_000, 2013),
    (1_629_010_000, 2014),
    (2_369_359_761, 2015),
    (4_239_516_754, 2016),
    (6_345_108_209, 2017),
    (10_016_232_395, 2018),
    (27_238_602_159, 2019),
    (43_464_475_395, 2020),
    (50_289_297_647, 2021),
    (57_464_707_082, 2022),
    (63_313_426_938, 2023),
    (70_000_000_000, 2024),
];

/// Map a numeric id to an age label like "12 years old (2013)".
///
/// Ids above the last breakpoint label as "Created in 2024"; unparseable ids
/// yield "Unknown". Grouped ids ("1,629,010,000") are accepted.
pub fn estimate_account_age(numeric_id: &str) -> String {
    let Ok(id) = numeric_id.replace(',', "").parse::<u64>() else {
        return "Unknown".to_string();
    };
    match ID_YEAR_BREAKPOINTS.iter().find(|(limit, _)| id <= *limit) {
        Some((_, year)) => age_label(*year, chrono::Utc::now().year()),
        None => "Created in 2024".to_string(),
    }
}

fn age_label(year: i32, current_year: i32) -> String {
    match current_year - year {
        i32::MIN..=0 => format!("Created in {year}"),
        1 => format!("1 year old ({year})"),
        n => format!("{n} years old ({year})"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_breakpoint_year_selection() {
        assert!(estimate_account_age("1").ends_with("(2010)"));
        assert!(estimate_account_age("900990000").ends_with("(2013)"));
        assert!(estimate_account_age("900990001").ends_with("(2014)"));
        assert!(estimate_account_age("2369359761").ends_with("(2015)"));
        assert!(estimate_account_age("2369359762").ends_with("(2016)"));
        assert!(estimate_account_age("4000000000").ends_with("(2016)"));
        assert!(estimate_account_age("27238602159").ends_with("(2019)"));
        assert!(estimate_account_age("27238602160").ends_with("(2020)"));
        assert!(estimate_account_age("63313426938").ends_with("(2023)"));
    }

    #[test]
    fn test_ids_beyond_table_label_as_current() {
        assert_eq!(estimate_account_age("70000000001"), "Created in 2024");
        assert_eq!(estimate_account_age("99999999999"), "Created in 2024");
    }

    #[test]
    fn test_grouped_ids_are_accepted() {
        assert!(estimate_account_age("1,629,010,000").ends_with("(2014)"));
    }

    #[test]
    fn test_age_label_forms() {
        assert_eq!(age_label(2024, 2024), "Created in 2024");
        assert_eq!(age_label(2023, 2024), "1 year old (2023)");
        assert_eq!(age_label(2013, 2026), "13 years old (2013)");
    }

    #[test]
    fn test_non_numeric_id_is_unknown() {
        assert_eq!(estimate_account_age("N/A"), "Unknown");
        assert_eq!(estimate_account_age(""), "Unknown");
    }
}
