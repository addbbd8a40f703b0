use crate::limits::*;
use crate::model::*;

use super::error::{BookingError, EngineError};

pub(crate) fn validate_span(span: &Span) -> Result<(), BookingError> {
    if !span.is_well_formed() {
        return Err(BookingError::MalformedInterval("start must be before end"));
    }
    Ok(())
}

/// Host-side validation: well-formed plus sane bounds.
pub(crate) fn validate_span_limits(span: &Span) -> Result<(), EngineError> {
    validate_span(span)?;
    if span.start < MIN_VALID_TIMESTAMP_MS || span.end > MAX_VALID_TIMESTAMP_MS {
        return Err(EngineError::LimitExceeded("timestamp out of range"));
    }
    if span.duration_ms() > MAX_SPAN_DURATION_MS {
        return Err(EngineError::LimitExceeded("span too wide"));
    }
    Ok(())
}

pub(crate) fn buffer_ms(preparation_minutes: i64) -> Result<Ms, BookingError> {
    if preparation_minutes < 0 {
        return Err(BookingError::MalformedInterval("negative preparation time"));
    }
    Ok(preparation_minutes.saturating_mul(MINUTE_MS))
}

/// Two occupancies clash when either one, extended at its end by the
/// preparation buffer, runs into the other's raw interval.
///
/// The test is symmetric: a candidate that ends less than `buffer` before an
/// existing start is refused, just like one starting less than `buffer` after
/// an existing end.
pub(crate) fn clashes(candidate: &Span, existing: &Span, buffer: Ms) -> bool {
    existing.buffered(buffer).overlaps(candidate) || candidate.buffered(buffer).overlaps(existing)
}
