//! Solidity bindings for the on-chain risk-analyzer surface.

use alloy_sol_types::sol;

sol! {
    /// The confidential risk-analyzer contract. Ciphertext handles are
    /// `bytes32`; `analyze` takes externally encrypted inputs plus the
    /// validity proof covering them.
    #[sol(rpc)]
    contract RiskAnalyzer {
        error UnsupportedProtocol();

        function analyze(
            bytes32 cipherAssets,
            bytes32 cipherRiskPref,
            bytes32 cipherPositionVol,
            bytes inputProof
        ) external;

        function confidentialProtocolId() external view returns (uint256);

        function getAll()
            external
            view
            returns (
                bytes32 riskScore,
                bytes32 riskLevel,
                bytes32 stablePct,
                bytes32 bluechipPct,
                bytes32 highRiskPct
            );

        function getRecommendations()
            external
            view
            returns (bytes32 stable, bytes32 bluechip, bytes32 highRisk);

        function getRiskLevel() external view returns (bytes32);

        function getRiskScore() external view returns (bytes32);
    }
}
