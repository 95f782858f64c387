/// Table, index and change-notification trigger. `{channel}` is substituted
/// with the configured notify channel before execution.
pub const ENSURE_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS alerts (
    id            uuid PRIMARY KEY,
    submission_id uuid NOT NULL UNIQUE,
    coach         text NOT NULL,
    seat          text NOT NULL,
    kind          text NOT NULL,
    category      text NOT NULL,
    priority      text NOT NULL,
    status        text NOT NULL DEFAULT 'pending',
    created_at    timestamptz NOT NULL DEFAULT NOW(),
    updated_at    timestamptz NOT NULL DEFAULT NOW()
);

CREATE INDEX IF NOT EXISTS alerts_created_at_idx ON alerts (created_at DESC);

CREATE OR REPLACE FUNCTION notify_alert_change() RETURNS trigger AS $$
DECLARE
    rec alerts;
BEGIN
    IF TG_OP = 'DELETE' THEN
        rec := OLD;
    ELSE
        rec := NEW;
    END IF;
    PERFORM pg_notify(
        TG_ARGV[0],
        json_build_object('id', rec.id, 'status', rec.status, 'op', TG_OP)::text
    );
    RETURN NULL;
END;
$$ LANGUAGE plpgsql;

DROP TRIGGER IF EXISTS alerts_changed ON alerts;

CREATE TRIGGER alerts_changed
AFTER INSERT OR UPDATE OR DELETE ON alerts
FOR EACH ROW EXECUTE FUNCTION notify_alert_change('{channel}');
"#;

pub const INSERT_ALERT: &str = r#"
INSERT INTO alerts (id, submission_id, coach, seat, kind, category, priority, status)
VALUES ($1, $2, $3, $4, $5, $6, $7, 'pending')
ON CONFLICT (id) DO NOTHING
RETURNING id, coach, seat, kind, category, priority, status, created_at, updated_at;
"#;

pub const SELECT_ALERT: &str = r#"
SELECT id, coach, seat, kind, category, priority, status, created_at, updated_at
FROM alerts WHERE id = $1;
"#;

pub const SELECT_SNAPSHOT: &str = r#"
SELECT id, coach, seat, kind, category, priority, status, created_at, updated_at
FROM alerts ORDER BY created_at DESC, id ASC;
"#;

/// Compare-and-set on status. Zero rows back means conflict or missing.
pub const CONDITIONAL_UPDATE_STATUS: &str = r#"
UPDATE alerts
SET status = $2,
    updated_at = NOW()
WHERE id = $1 AND status = ANY($3)
RETURNING id, coach, seat, kind, category, priority, status, created_at, updated_at;
"#;

pub const SELECT_STATUS: &str = r#"
SELECT status FROM alerts WHERE id = $1;
"#;
