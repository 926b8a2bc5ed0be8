use snafu::Snafu;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum CoreError {
    #[snafu(display("{id_type} must not be blank"))]
    BlankId {
        stage: &'static str,
        id_type: &'static str,
    },
    #[snafu(display("timestamp '{raw}' is not ISO-8601 on `{stage}`: {source}"))]
    InvalidTimestamp {
        stage: &'static str,
        raw: String,
        source: chrono::ParseError,
    },
}

pub type CoreResult<T> = Result<T, CoreError>;
