//! Birth date normalization
//!
//! Roster dates arrive as `month/day/year` with optional zero padding and
//! two or four digit years. The portal wants `MM/DD/YYYY`, but some rosters
//! actually hold day-first dates; the portal's own format error is what
//! tells the two apart, so [`invert`] swaps the first two components without
//! checking plausibility.

/// Two-digit years at or above this pivot are 19xx, below it 20xx
pub const CENTURY_PIVOT: u32 = 30;

/// Normalize `month/day/year` to zero-padded `MM/DD/YYYY`
///
/// Input that does not split into exactly three parts is returned unchanged.
#[must_use]
pub fn normalize(date: &str) -> String {
    let parts: Vec<&str> = date.split('/').map(str::trim).collect();
    let [month, day, year] = parts.as_slice() else {
        return date.to_string();
    };

    let year = match (year.len(), year.parse::<u32>()) {
        (2, Ok(yy)) if yy >= CENTURY_PIVOT => format!("19{year}"),
        (2, Ok(_)) => format!("20{year}"),
        _ => (*year).to_string(),
    };

    format!("{month:0>2}/{day:0>2}/{year}")
}

/// Swap the first two components (`MM/DD/YYYY` to `DD/MM/YYYY`)
///
/// Input that does not split into exactly three parts is returned unchanged.
#[must_use]
pub fn invert(date: &str) -> String {
    match date.split('/').collect::<Vec<_>>().as_slice() {
        [first, second, rest] => format!("{second}/{first}/{rest}"),
        _ => date.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pads_month_and_day() {
        assert_eq!(normalize("3/8/2000"), "03/08/2000");
        assert_eq!(normalize("12/25/1985"), "12/25/1985");
    }

    #[test]
    fn expands_two_digit_years() {
        assert_eq!(normalize("3/8/00"), "03/08/2000");
        assert_eq!(normalize("3/8/29"), "03/08/2029");
        assert_eq!(normalize("3/8/30"), "03/08/1930");
        assert_eq!(normalize("11/1/99"), "11/01/1999");
    }

    #[test]
    fn trims_components() {
        assert_eq!(normalize(" 3 / 8 / 85 "), "03/08/1985");
    }

    #[test]
    fn passes_malformed_through() {
        assert_eq!(normalize("2000-03-08"), "2000-03-08");
        assert_eq!(normalize("3/8"), "3/8");
        assert_eq!(normalize(""), "");
        assert_eq!(normalize("1/2/3/4"), "1/2/3/4");
    }

    #[test]
    fn invert_swaps_verbatim() {
        assert_eq!(invert("03/08/2000"), "08/03/2000");
        assert_eq!(invert("31/12/1990"), "12/31/1990");
        assert_eq!(invert("13/45/1990"), "45/13/1990");
        assert_eq!(invert("garbage"), "garbage");
    }

    #[test]
    fn invert_twice_is_identity() {
        let d = normalize("7/4/76");
        assert_eq!(invert(&invert(&d)), d);
    }
}
