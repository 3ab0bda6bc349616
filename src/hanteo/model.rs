//! Wire types for the Hanteo chart-collect API.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Response codes the client distinguishes. Anything else is a hard failure.
pub mod codes {
    pub const SUCCESS: i64 = 100;
    pub const PARTIAL_SUCCESS: i64 = 101;
    pub const TOKEN_INVALID: i64 = 821;
    pub const TOKEN_EXPIRED: i64 = 822;
}

/// Envelope every Hanteo response is wrapped in.
#[derive(Debug, Deserialize)]
pub struct Envelope<T> {
    pub code: i64,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(rename = "resultData")]
    pub result_data: Option<T>,
}

#[derive(Debug, Deserialize)]
pub struct TokenData {
    pub access_token: String,
    pub token_type: String,
    pub expires_in: i64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectData {
    pub request_count: i64,
    pub success_count: i64,
    pub fail_count: i64,
    /// Rejected records keyed by `opVal`, valued by a Hanteo error code.
    #[serde(default)]
    pub fail_data: Option<HashMap<String, i64>>,
}

/// One album-sale record in the bulk-collect payload.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SaleRecord {
    pub family_code: i64,
    pub branch_code: i64,
    pub barcode: String,
    pub album_name: String,
    pub sales_volume: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nation: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub addr_top: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sws_sex: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sws_birth: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sp_code: Option<String>,
    /// Unix seconds of the fulfillment event.
    pub real_time: i64,
    /// Caller-generated dedup token.
    pub op_val: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn sale_record_serializes_camel_case_and_omits_empty_options() {
        let record = SaleRecord {
            family_code: 1000,
            branch_code: 1,
            barcode: "8809633189505".into(),
            album_name: "Test Album".into(),
            sales_volume: 2,
            nation: Some("KR".into()),
            addr_top: None,
            sws_sex: None,
            sws_birth: None,
            sp_code: None,
            real_time: 1_700_000_000,
            op_val: "450789469-466157049".into(),
        };
        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(
            value,
            json!({
                "familyCode": 1000,
                "branchCode": 1,
                "barcode": "8809633189505",
                "albumName": "Test Album",
                "salesVolume": 2,
                "nation": "KR",
                "realTime": 1_700_000_000,
                "opVal": "450789469-466157049",
            })
        );
    }

    #[test]
    fn collect_envelope_parses_partial_failure() {
        let body = json!({
            "code": 101,
            "message": "partial",
            "resultData": {
                "requestCount": 3,
                "successCount": 2,
                "failCount": 1,
                "failData": { "450789469-466157049": 301 }
            }
        });
        let env: Envelope<CollectData> = serde_json::from_value(body).unwrap();
        assert_eq!(env.code, codes::PARTIAL_SUCCESS);
        let data = env.result_data.unwrap();
        assert_eq!(data.fail_count, 1);
        assert_eq!(
            data.fail_data.unwrap().get("450789469-466157049"),
            Some(&301)
        );
    }

    #[test]
    fn token_envelope_parses() {
        let body = json!({
            "code": 100,
            "message": "success",
            "resultData": {
                "access_token": "abc",
                "token_type": "bearer",
                "expires_in": 86400
            }
        });
        let env: Envelope<TokenData> = serde_json::from_value(body).unwrap();
        assert_eq!(env.code, codes::SUCCESS);
        assert_eq!(env.result_data.unwrap().access_token, "abc");
    }
}
