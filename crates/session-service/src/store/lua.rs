//! Lua scripts for atomic session operations.
//!
//! Rotation must be a compare-and-swap over the session's key family:
//! many callers can race on the same sid, and exactly one new active jti
//! may win. Running the comparison and all writes inside one Lua script
//! makes the commit atomic on the server, with no WATCH/MULTI retry
//! plumbing on the client.

/// Compare-and-swap rotation commit.
///
/// Arguments:
/// - KEYS[1]: active jti key (`rt:active:{sid}`)
/// - KEYS[2]: previous jti key (`rt:prev:{sid}`)
/// - KEYS[3]: last issued token key (`rt:last:{sid}`)
/// - KEYS[4]: session metadata hash key (`rt:sess:{sid}`)
/// - ARGV[1]: expected active jti
/// - ARGV[2]: new jti
/// - ARGV[3]: new refresh token
/// - ARGV[4]: session TTL in seconds
/// - ARGV[5]: grace window in seconds
/// - ARGV[6]: idempotency window in seconds
///
/// Returns:
/// - 1: Committed (new jti is active, old jti demoted to previous)
/// - 0: Conflict (active jti no longer matches expectation)
pub const ROTATE_CAS: &str = r#"
local current = redis.call('GET', KEYS[1])

if current == false or current ~= ARGV[1] then
    -- Another rotation won, or the session expired under us
    return 0
end

redis.call('SET', KEYS[1], ARGV[2], 'EX', tonumber(ARGV[4]))
redis.call('SET', KEYS[2], ARGV[1], 'EX', tonumber(ARGV[5]))
redis.call('SET', KEYS[3], ARGV[3], 'EX', tonumber(ARGV[6]))
redis.call('EXPIRE', KEYS[4], tonumber(ARGV[4]))
return 1
"#;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rotate_cas_script_shape() {
        // The script must touch all four keys of the family and never
        // write without the comparison passing first.
        assert!(ROTATE_CAS.contains("KEYS[4]"));
        assert!(ROTATE_CAS.contains("ARGV[6]"));
        let compare_at = ROTATE_CAS
            .find("current ~= ARGV[1]")
            .unwrap_or(usize::MAX);
        let first_write_at = ROTATE_CAS.find("redis.call('SET'").unwrap_or(0);
        assert!(compare_at < first_write_at);
    }
}
