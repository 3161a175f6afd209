use std::time::Duration;

/// Powers of two bracketing `size`: the largest one `<= size` and the smallest one `>= size`.
///
/// For sizes below two, both bounds collapse to the smallest valid anonymity set of two.
pub fn power_of_two_bounds(size: usize) -> (usize, usize) {
	if size <= 2 {
		return (size.max(1), 2);
	}
	let next = size.next_power_of_two();
	let previous = if next == size { size } else { next / 2 };
	(previous, next)
}

pub fn is_valid_set_size(size: usize) -> bool {
	size >= 2 && size.is_power_of_two()
}

/// Human-readable wait, rounded up to whole seconds ("1 second", "5 seconds").
pub fn format_wait(wait: Duration) -> String {
	let seconds = wait.as_millis().div_ceil(1000);
	let plural = if seconds == 1 { "" } else { "s" };
	format!("{} second{}", seconds, plural)
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn bounds_around_non_powers() {
		assert_eq!(power_of_two_bounds(3), (2, 4));
		assert_eq!(power_of_two_bounds(5), (4, 8));
		assert_eq!(power_of_two_bounds(7), (4, 8));
		assert_eq!(power_of_two_bounds(9), (8, 16));
	}

	#[test]
	fn bounds_of_a_power_are_itself() {
		assert_eq!(power_of_two_bounds(8), (8, 8));
		assert!(is_valid_set_size(8));
		assert!(!is_valid_set_size(1));
		assert!(!is_valid_set_size(6));
	}

	#[test]
	fn wait_formatting_rounds_up() {
		assert_eq!(format_wait(Duration::from_millis(200)), "1 second");
		assert_eq!(format_wait(Duration::from_millis(4001)), "5 seconds");
	}
}
