//! Type conversions between internal types and proto types

use tonic::{Code, Status};

use fx_core::{ErrorCode, RateError, RatePair, RejectedRequest, StreamMessage};

use crate::proto::{
    streaming_rate_response::Message, RateRequest, RateResponse, StreamingRateResponse,
    SubscriptionError,
};

impl From<&RatePair> for RateRequest {
    fn from(pair: &RatePair) -> Self {
        RateRequest {
            base: pair.base.to_string(),
            destination: pair.destination.to_string(),
        }
    }
}

impl TryFrom<RateRequest> for RatePair {
    type Error = RateError;

    fn try_from(request: RateRequest) -> Result<Self, Self::Error> {
        RatePair::parse(&request.base, &request.destination)
    }
}

impl From<RateRequest> for RejectedRequest {
    fn from(request: RateRequest) -> Self {
        RejectedRequest {
            base: request.base,
            destination: request.destination,
        }
    }
}

impl From<RejectedRequest> for RateRequest {
    fn from(request: RejectedRequest) -> Self {
        RateRequest {
            base: request.base,
            destination: request.destination,
        }
    }
}

pub fn rate_response(pair: &RatePair, rate: f64) -> RateResponse {
    RateResponse {
        base: pair.base.to_string(),
        destination: pair.destination.to_string(),
        rate,
    }
}

pub fn error_code_to_proto(code: ErrorCode) -> Code {
    match code {
        ErrorCode::InvalidArgument => Code::InvalidArgument,
    }
}

/// Decode an in-band error code; codes the server never sends are rejected
pub fn error_code_from_proto(code: i32) -> Result<ErrorCode, Status> {
    match Code::from_i32(code) {
        Code::InvalidArgument => Ok(ErrorCode::InvalidArgument),
        other => Err(Status::internal(format!(
            "unexpected subscription error code {other:?} ({code})"
        ))),
    }
}

/// Map a lookup failure onto the gRPC status returned to the caller
pub fn rate_error_to_status(error: &RateError) -> Status {
    match error {
        RateError::RateNotFound(_) => Status::not_found(error.to_string()),
        RateError::InvalidArgument { .. } | RateError::InvalidCurrency(_) => {
            Status::invalid_argument(error.to_string())
        }
    }
}

impl From<StreamMessage> for StreamingRateResponse {
    fn from(message: StreamMessage) -> Self {
        let message = match message {
            StreamMessage::RateUpdate { pair, rate } => {
                Message::RateResponse(rate_response(&pair, rate))
            }
            StreamMessage::SubscriptionError { code, message, request } => {
                Message::Error(SubscriptionError {
                    code: error_code_to_proto(code) as i32,
                    message,
                    request: Some(request.into()),
                })
            }
        };

        StreamingRateResponse {
            message: Some(message),
        }
    }
}

impl TryFrom<StreamingRateResponse> for StreamMessage {
    type Error = Status;

    fn try_from(response: StreamingRateResponse) -> Result<Self, Self::Error> {
        match response.message {
            Some(Message::RateResponse(rr)) => {
                let pair = RatePair::parse(&rr.base, &rr.destination)
                    .map_err(|e| Status::internal(e.to_string()))?;
                Ok(StreamMessage::rate_update(pair, rr.rate))
            }
            Some(Message::Error(err)) => {
                let code = error_code_from_proto(err.code)?;
                let request = err
                    .request
                    .map(RejectedRequest::from)
                    .ok_or_else(|| Status::internal("subscription error without request"))?;

                Ok(StreamMessage::SubscriptionError {
                    code,
                    message: err.message,
                    request,
                })
            }
            None => Err(Status::internal("empty streaming rate response")),
        }
    }
}
